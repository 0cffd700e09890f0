use anyhow::Result;
use async_trait::async_trait;
use geoguess_types::{
    FinalResults, Game, GameId, GameRound, GameSettings, GameStatus, Guess, Player, PlayerId,
    RoundId,
};

/// Durable record of games, players, rounds and guesses.
///
/// Every mutation returns the updated aggregate, or `None` when the keyed
/// game, round or player does not exist. Stored players carry no score; the
/// scoreboard is always derived from round guesses.
#[async_trait]
pub trait GameStore: Send + Sync {
    async fn create_game(&self, game: &Game) -> Result<Game>;

    async fn get_game_by_id(&self, game_id: GameId) -> Result<Option<Game>>;

    async fn get_game_by_code(&self, code: &str) -> Result<Option<Game>>;

    async fn add_player(&self, game_id: GameId, player: &Player) -> Result<Option<Game>>;

    async fn remove_player(&self, game_id: GameId, player_id: PlayerId) -> Result<Option<Game>>;

    async fn update_game_status(&self, game_id: GameId, status: GameStatus)
    -> Result<Option<Game>>;

    async fn update_game_settings(
        &self,
        game_id: GameId,
        settings: &GameSettings,
    ) -> Result<Option<Game>>;

    async fn create_round(&self, game_id: GameId, round: &GameRound) -> Result<Option<Game>>;

    async fn complete_round(&self, round_id: RoundId, end_time: i64) -> Result<Option<Game>>;

    async fn add_guess(&self, round_id: RoundId, guess: &Guess) -> Result<Option<Game>>;

    /// Overwrite the scoring fields of a player's guess in a round.
    async fn update_guess(&self, round_id: RoundId, guess: &Guess) -> Result<Option<Game>>;

    async fn update_game_final_results(
        &self,
        game_id: GameId,
        results: &FinalResults,
    ) -> Result<Option<Game>>;
}
