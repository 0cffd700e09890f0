pub mod games;
pub mod guesses;
pub mod players;
pub mod rounds;

pub mod prelude {
    pub use super::games::Entity as Games;
    pub use super::guesses::Entity as Guesses;
    pub use super::players::Entity as Players;
    pub use super::rounds::Entity as Rounds;
}
