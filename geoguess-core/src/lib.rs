pub mod agent;
pub mod cities;
pub mod cleanup;
pub mod game_events;
pub mod game_state;
pub mod join_code;
pub mod scoring;

// Re-export main components
pub use agent::*;
pub use cities::*;
pub use cleanup::*;
pub use game_events::*;
pub use game_state::*;
pub use join_code::*;
pub use scoring::*;
