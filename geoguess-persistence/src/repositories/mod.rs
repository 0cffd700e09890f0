pub mod game_repository;
pub mod memory_store;

pub use game_repository::GameRepository;
pub use memory_store::MemoryGameStore;
