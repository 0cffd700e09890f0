pub mod game;
pub mod messages;
pub mod errors;

// Re-export all types
pub use game::*;
pub use messages::*;
pub use errors::*;

pub type GameId = uuid::Uuid;
pub type PlayerId = uuid::Uuid;
pub type RoundId = uuid::Uuid;
