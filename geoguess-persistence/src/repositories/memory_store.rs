use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::GameStore;
use geoguess_types::{
    FinalResults, Game, GameId, GameRound, GameSettings, GameStatus, Guess, Player, PlayerId,
    RoundId,
};

/// Non-durable store for tests and database-less runs.
#[derive(Default)]
pub struct MemoryGameStore {
    games: RwLock<HashMap<GameId, Game>>,
}

impl MemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn game_count(&self) -> usize {
        self.games.read().await.len()
    }

    async fn update<F>(&self, game_id: GameId, apply: F) -> Result<Option<Game>>
    where
        F: FnOnce(&mut Game) -> bool + Send,
    {
        let mut games = self.games.write().await;
        let Some(game) = games.get_mut(&game_id) else {
            return Ok(None);
        };
        Ok(apply(game).then(|| game.clone()))
    }

    async fn update_round<F>(&self, round_id: RoundId, apply: F) -> Result<Option<Game>>
    where
        F: FnOnce(&mut GameRound) -> bool + Send,
    {
        let mut games = self.games.write().await;
        for game in games.values_mut() {
            if let Some(round) = game.rounds.iter_mut().find(|r| r.id == round_id) {
                return Ok(apply(round).then(|| game.clone()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl GameStore for MemoryGameStore {
    async fn create_game(&self, game: &Game) -> Result<Game> {
        let mut games = self.games.write().await;
        if games.values().any(|g| g.code == game.code) {
            return Err(anyhow!("Game code {} already exists", game.code));
        }

        let mut stored = game.clone();
        for player in &mut stored.players {
            player.score = 0;
        }
        games.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_game_by_id(&self, game_id: GameId) -> Result<Option<Game>> {
        Ok(self.games.read().await.get(&game_id).cloned())
    }

    async fn get_game_by_code(&self, code: &str) -> Result<Option<Game>> {
        let games = self.games.read().await;
        Ok(games.values().find(|g| g.code == code).cloned())
    }

    async fn add_player(&self, game_id: GameId, player: &Player) -> Result<Option<Game>> {
        let mut player = player.clone();
        player.score = 0;
        self.update(game_id, |game| {
            game.players.push(player);
            true
        })
        .await
    }

    async fn remove_player(&self, game_id: GameId, player_id: PlayerId) -> Result<Option<Game>> {
        self.update(game_id, |game| {
            let before = game.players.len();
            game.players.retain(|p| p.id != player_id);
            game.players.len() != before
        })
        .await
    }

    async fn update_game_status(
        &self,
        game_id: GameId,
        status: GameStatus,
    ) -> Result<Option<Game>> {
        self.update(game_id, |game| {
            game.status = status;
            true
        })
        .await
    }

    async fn update_game_settings(
        &self,
        game_id: GameId,
        settings: &GameSettings,
    ) -> Result<Option<Game>> {
        let settings = settings.clone();
        self.update(game_id, |game| {
            game.settings = settings;
            true
        })
        .await
    }

    async fn create_round(&self, game_id: GameId, round: &GameRound) -> Result<Option<Game>> {
        let round = round.clone();
        self.update(game_id, |game| {
            game.rounds.push(round);
            true
        })
        .await
    }

    async fn complete_round(&self, round_id: RoundId, end_time: i64) -> Result<Option<Game>> {
        self.update_round(round_id, |round| {
            round.completed = true;
            round.end_time = Some(end_time);
            true
        })
        .await
    }

    async fn add_guess(&self, round_id: RoundId, guess: &Guess) -> Result<Option<Game>> {
        let guess = guess.clone();
        let mut duplicate = false;
        let result = self
            .update_round(round_id, |round| {
                if round.has_guessed(guess.player_id) {
                    duplicate = true;
                    return false;
                }
                round.guesses.push(guess);
                true
            })
            .await?;

        if duplicate {
            return Err(anyhow!("Guess already recorded for this player and round"));
        }
        Ok(result)
    }

    async fn update_guess(&self, round_id: RoundId, guess: &Guess) -> Result<Option<Game>> {
        let guess = guess.clone();
        self.update_round(round_id, |round| {
            match round
                .guesses
                .iter_mut()
                .find(|g| g.player_id == guess.player_id)
            {
                Some(stored) => {
                    stored.placement_points = guess.placement_points;
                    stored.bonus_points = guess.bonus_points;
                    stored.total_points = guess.total_points;
                    stored.placement = guess.placement;
                    true
                }
                None => false,
            }
        })
        .await
    }

    async fn update_game_final_results(
        &self,
        game_id: GameId,
        results: &FinalResults,
    ) -> Result<Option<Game>> {
        let results = results.clone();
        self.update(game_id, |game| {
            game.final_results = Some(results);
            true
        })
        .await
    }
}
