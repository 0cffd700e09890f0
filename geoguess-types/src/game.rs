use crate::{GameId, PlayerId, RoundId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum CityDifficulty {
    Easy,   // Capitals and landmark cities
    Medium, // Regional centres
    Hard,   // Obscure towns
}

impl CityDifficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            CityDifficulty::Easy => "easy",
            CityDifficulty::Medium => "medium",
            CityDifficulty::Hard => "hard",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "easy" => Some(CityDifficulty::Easy),
            "medium" => Some(CityDifficulty::Medium),
            "hard" => Some(CityDifficulty::Hard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct City {
    pub name: String,
    pub country: String,
    pub lat: f64,
    pub lng: f64,
    pub difficulty: CityDifficulty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum GameStatus {
    Waiting,  // Lobby open, players joining
    Playing,  // Rounds in progress
    Finished, // Final results recorded
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Waiting => "waiting",
            GameStatus::Playing => "playing",
            GameStatus::Finished => "finished",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "waiting" => Some(GameStatus::Waiting),
            "playing" => Some(GameStatus::Playing),
            "finished" => Some(GameStatus::Finished),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct GameSettings {
    pub max_players: u32,
    #[ts(type = "number")]
    pub round_time_limit_ms: u64,
    pub total_rounds: u32,
    pub city_difficulty: CityDifficulty,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            max_players: 8,
            round_time_limit_ms: 30_000,
            total_rounds: 5,
            city_difficulty: CityDifficulty::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub is_computer: bool,
    /// Projection of the round history, filled in on every snapshot.
    pub score: i32,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Guess {
    pub player_id: PlayerId,
    pub lat: f64,
    pub lng: f64,
    pub distance: f64, // km
    pub placement_points: i32,
    pub bonus_points: i32,
    pub total_points: i32,
    pub placement: u32,
    #[ts(type = "number")]
    pub timestamp: i64, // epoch millis
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct GameRound {
    pub id: RoundId,
    pub city: City,
    pub guesses: Vec<Guess>,
    pub completed: bool,
    #[ts(type = "number")]
    pub start_time: i64,
    #[ts(type = "number | null")]
    pub end_time: Option<i64>,
}

impl GameRound {
    pub fn has_guessed(&self, player_id: PlayerId) -> bool {
        self.guesses.iter().any(|g| g.player_id == player_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PlayerScore {
    pub player_id: PlayerId,
    pub player_name: String,
    pub is_computer: bool,
    pub total_score: i32,
    pub final_placement: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FinalResults {
    pub player_scores: Vec<PlayerScore>,
    pub winner_id: Option<PlayerId>,
    pub winner_ids: Vec<PlayerId>,
    #[ts(type = "number")]
    pub game_end_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Game {
    pub id: GameId,
    pub code: String,
    pub host_id: PlayerId,
    pub players: Vec<Player>,
    pub rounds: Vec<GameRound>,
    pub status: GameStatus,
    pub settings: GameSettings,
    pub final_results: Option<FinalResults>,
    #[ts(type = "number")]
    pub created_at: i64,
}

impl Game {
    pub fn player(&self, player_id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }

    pub fn is_host(&self, player_id: PlayerId) -> bool {
        self.host_id == player_id
    }

    /// The round currently accepting guesses: the last round, if not yet completed.
    pub fn active_round(&self) -> Option<&GameRound> {
        self.rounds.last().filter(|r| !r.completed)
    }

    pub fn current_round(&self) -> Option<&GameRound> {
        self.rounds.last()
    }

    pub fn completed_round_count(&self) -> usize {
        self.rounds.iter().filter(|r| r.completed).count()
    }

    pub fn human_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| !p.is_computer)
    }

    pub fn computer_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.is_computer)
    }

    /// Sum of total points per player over every round. Guesses in a round that
    /// has not been scored yet carry zero totals and so contribute nothing.
    pub fn scoreboard(&self) -> HashMap<PlayerId, i32> {
        let mut totals: HashMap<PlayerId, i32> =
            self.players.iter().map(|p| (p.id, 0)).collect();
        for round in &self.rounds {
            for guess in &round.guesses {
                *totals.entry(guess.player_id).or_insert(0) += guess.total_points;
            }
        }
        totals
    }

    /// Copy of the game with every player's score recomputed from the rounds.
    pub fn with_projected_scores(&self) -> Self {
        let totals = self.scoreboard();
        let mut game = self.clone();
        for player in &mut game.players {
            player.score = totals.get(&player.id).copied().unwrap_or(0);
        }
        game
    }

    /// What one player may see: in the active round the target coordinates and
    /// the other players' guesses stay hidden until scoring.
    pub fn personalized_for_player(&self, player_id: PlayerId) -> Self {
        let mut game = self.with_projected_scores();
        game.rounds = self
            .rounds
            .iter()
            .map(|round| round.personalized_for_player(player_id))
            .collect();
        game
    }
}

impl GameRound {
    pub fn personalized_for_player(&self, player_id: PlayerId) -> Self {
        let mut round = self.clone();
        if round.completed {
            return round;
        }

        round.city.lat = 0.0;
        round.city.lng = 0.0;
        for guess in &mut round.guesses {
            if guess.player_id != player_id {
                guess.lat = 0.0;
                guess.lng = 0.0;
                guess.distance = 0.0;
                guess.bonus_points = 0;
            }
        }
        round
    }
}

/// Lobby view served by code lookup, without round history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct GameSummary {
    pub id: GameId,
    pub code: String,
    pub status: GameStatus,
    pub host_name: Option<String>,
    pub player_names: Vec<String>,
    pub max_players: u32,
    pub rounds_played: u32,
    pub total_rounds: u32,
}

impl From<&Game> for GameSummary {
    fn from(game: &Game) -> Self {
        Self {
            id: game.id,
            code: game.code.clone(),
            status: game.status,
            host_name: game.player(game.host_id).map(|p| p.name.clone()),
            player_names: game.players.iter().map(|p| p.name.clone()).collect(),
            max_players: game.settings.max_players,
            rounds_played: game.completed_round_count() as u32,
            total_rounds: game.settings.total_rounds,
        }
    }
}
