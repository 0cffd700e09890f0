use crate::{AgentSimulator, CityCatalog, GuessLocation, ScoringEngine};
use geoguess_types::{
    City, FinalResults, Game, GameError, GameRound, GameSettings, GameStatus, Guess, Player,
    PlayerId, PlayerScore, RoundId,
};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Guesses arriving this long after a round closed are still recorded.
pub const ROUND_GRACE_PERIOD_MS: i64 = 5000;

pub const MAX_PLAYERS_LIMIT: u32 = 16;
pub const MAX_NAME_LENGTH: usize = 32;
pub const MIN_ROUND_TIME_MS: u64 = 5_000;
pub const MAX_ROUND_TIME_MS: u64 = 300_000;
pub const MAX_TOTAL_ROUNDS: u32 = 20;

const COMPUTER_NAMES: &[&str] = &[
    "Mercator",
    "Magellan",
    "Amundsen",
    "Ibn Battuta",
    "Zheng He",
    "Earhart",
    "Humboldt",
    "Shackleton",
];

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone)]
pub struct SubmittedGuess {
    pub round_id: RoundId,
    pub guess: Guess,
    /// Accepted inside the grace window after the round closed. Never rescored.
    pub late: bool,
    pub all_humans_guessed: bool,
    pub all_guessed: bool,
}

#[derive(Debug, Clone)]
pub enum RoundAdvance {
    NextRound(GameRound),
    Finished(FinalResults),
}

/// Authoritative in-memory state of one game and the transitions allowed on it.
#[derive(Debug, Clone)]
pub struct GameSession {
    pub game: Game,
    pub last_activity: Instant,
}

impl GameSession {
    /// Open a lobby with the host seated as its first player.
    pub fn create(
        code: String,
        host_name: &str,
        settings: GameSettings,
        now: i64,
    ) -> Result<Self, GameError> {
        let host_name = validate_name(host_name)?;
        validate_settings(&settings, 1)?;

        let host = Player {
            id: Uuid::new_v4(),
            name: host_name,
            is_computer: false,
            score: 0,
            accuracy: None,
        };

        let game = Game {
            id: Uuid::new_v4(),
            code,
            host_id: host.id,
            players: vec![host],
            rounds: Vec::new(),
            status: GameStatus::Waiting,
            settings,
            final_results: None,
            created_at: now,
        };

        Ok(Self::from_game(game))
    }

    pub fn from_game(game: Game) -> Self {
        Self {
            game,
            last_activity: Instant::now(),
        }
    }

    /// Snapshot handed to callers, with scores projected from the round history.
    pub fn snapshot(&self) -> Game {
        self.game.with_projected_scores()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() >= timeout
    }

    fn ensure_waiting(&self) -> Result<(), GameError> {
        if self.game.status != GameStatus::Waiting {
            return Err(GameError::invalid_state(self.game.status.as_str()));
        }
        Ok(())
    }

    pub fn add_player(&mut self, name: &str) -> Result<Player, GameError> {
        self.ensure_waiting()?;
        let name = validate_name(name)?;

        if self.game.players.len() >= self.game.settings.max_players as usize {
            return Err(GameError::forbidden("Game is full"));
        }
        if self.name_taken(&name) {
            return Err(GameError::forbidden("Name is already taken"));
        }

        let player = Player {
            id: Uuid::new_v4(),
            name,
            is_computer: false,
            score: 0,
            accuracy: None,
        };
        self.game.players.push(player.clone());
        debug!("Seated player {} in game {}", player.id, self.game.id);
        Ok(player)
    }

    /// Seat up to `count` computer players, limited by the free seats.
    pub fn add_computer_players(
        &mut self,
        count: u32,
        agent: &AgentSimulator,
    ) -> Result<Vec<Player>, GameError> {
        self.ensure_waiting()?;

        let free = (self.game.settings.max_players as usize).saturating_sub(self.game.players.len());
        if free == 0 {
            return Err(GameError::forbidden("Game is full"));
        }

        let mut added = Vec::new();
        for _ in 0..(count as usize).min(free) {
            let player = Player {
                id: Uuid::new_v4(),
                name: self.next_computer_name(),
                is_computer: true,
                score: 0,
                accuracy: Some(agent.sample_accuracy()),
            };
            self.game.players.push(player.clone());
            added.push(player);
        }
        debug!(
            "Seated {} of {} requested computer players in game {}",
            added.len(),
            count,
            self.game.id
        );
        Ok(added)
    }

    fn name_taken(&self, name: &str) -> bool {
        self.game
            .players
            .iter()
            .any(|p| p.name.eq_ignore_ascii_case(name))
    }

    fn next_computer_name(&self) -> String {
        let computers = self.game.computer_players().count();
        let base = COMPUTER_NAMES[computers % COMPUTER_NAMES.len()];
        let mut name = base.to_string();
        let mut suffix = 2;
        while self.name_taken(&name) {
            name = format!("{} {}", base, suffix);
            suffix += 1;
        }
        name
    }

    pub fn remove_player(&mut self, player_id: PlayerId) -> Result<(), GameError> {
        self.ensure_waiting()?;
        if self.game.is_host(player_id) {
            return Err(GameError::forbidden("The host cannot leave the lobby"));
        }
        let before = self.game.players.len();
        self.game.players.retain(|p| p.id != player_id);
        if self.game.players.len() == before {
            return Err(GameError::not_found("Player"));
        }
        debug!("Removed player {} from game {}", player_id, self.game.id);
        Ok(())
    }

    pub fn update_settings(
        &mut self,
        requester: PlayerId,
        settings: GameSettings,
    ) -> Result<(), GameError> {
        if !self.game.is_host(requester) {
            return Err(GameError::NotHost);
        }
        if self.game.status != GameStatus::Waiting {
            return Err(GameError::forbidden(
                "Settings cannot change after the game has started",
            ));
        }
        validate_settings(&settings, self.game.players.len())?;
        debug!("Game {} settings now {:?}", self.game.id, settings);
        self.game.settings = settings;
        Ok(())
    }

    /// waiting -> playing, opening round 1.
    pub fn start(
        &mut self,
        requester: PlayerId,
        catalog: &CityCatalog,
        now: i64,
    ) -> Result<GameRound, GameError> {
        if !self.game.is_host(requester) {
            return Err(GameError::NotHost);
        }
        self.ensure_waiting()?;
        if self.game.players.is_empty() {
            return Err(GameError::invalid_state("waiting (no players)"));
        }

        let round = self.open_round(catalog, now)?;
        self.game.status = GameStatus::Playing;
        debug!("Game {} moved to playing", self.game.id);
        Ok(round)
    }

    fn open_round(&mut self, catalog: &CityCatalog, now: i64) -> Result<GameRound, GameError> {
        let used: Vec<&City> = self.game.rounds.iter().map(|r| &r.city).collect();
        let city = catalog
            .pick(self.game.settings.city_difficulty, &used)
            .ok_or_else(|| GameError::Internal {
                message: "No cities available".to_string(),
            })?;

        let round = GameRound {
            id: Uuid::new_v4(),
            city,
            guesses: Vec::new(),
            completed: false,
            start_time: now,
            end_time: None,
        };
        debug!(
            "Opened round {} of game {} on {}",
            self.game.rounds.len() + 1,
            self.game.id,
            round.city.name
        );
        self.game.rounds.push(round.clone());
        Ok(round)
    }

    pub fn is_round_active(&self, round_id: RoundId) -> bool {
        self.game
            .active_round()
            .is_some_and(|round| round.id == round_id)
    }

    /// Computer players that still owe a guess in the given active round.
    pub fn pending_computer_players(&self, round_id: RoundId) -> Vec<Player> {
        match self.game.active_round() {
            Some(round) if round.id == round_id => self
                .game
                .computer_players()
                .filter(|p| !round.has_guessed(p.id))
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn submit_guess(
        &mut self,
        player_id: PlayerId,
        lat: f64,
        lng: f64,
        now: i64,
        grace_period_ms: i64,
    ) -> Result<SubmittedGuess, GameError> {
        if self.game.status == GameStatus::Waiting {
            return Err(GameError::invalid_state(self.game.status.as_str()));
        }
        if self.game.player(player_id).is_none() {
            return Err(GameError::not_found("Player"));
        }
        if !lat.is_finite() || !lng.is_finite() || lat.abs() > 90.0 || lng.abs() > 180.0 {
            return Err(GameError::forbidden("Coordinates out of range"));
        }

        let round = self
            .game
            .rounds
            .last()
            .ok_or_else(|| GameError::not_found("Round"))?;
        if round.has_guessed(player_id) {
            return Err(GameError::DuplicateGuess);
        }

        let late = round.completed;
        if late {
            let within_grace = self.game.status == GameStatus::Playing
                && round.end_time.is_some_and(|end| now - end < grace_period_ms);
            if !within_grace {
                debug!("Rejected guess from {} on closed round {}", player_id, round.id);
                return Err(GameError::RoundClosed);
            }
        }

        self.push_guess(player_id, lat, lng, now, late)
    }

    /// Record a simulated guess, unless the round moved on or the agent
    /// already guessed while it was thinking.
    pub fn record_agent_guess(
        &mut self,
        round_id: RoundId,
        player_id: PlayerId,
        location: GuessLocation,
        now: i64,
    ) -> Option<SubmittedGuess> {
        let round = self.game.active_round().filter(|r| r.id == round_id)?;
        if round.has_guessed(player_id) {
            return None;
        }
        if !self.game.player(player_id).is_some_and(|p| p.is_computer) {
            return None;
        }
        self.push_guess(player_id, location.lat, location.lng, now, false)
            .ok()
    }

    fn push_guess(
        &mut self,
        player_id: PlayerId,
        lat: f64,
        lng: f64,
        now: i64,
        late: bool,
    ) -> Result<SubmittedGuess, GameError> {
        let players = &self.game.players;
        let round = self
            .game
            .rounds
            .last_mut()
            .ok_or_else(|| GameError::not_found("Round"))?;

        let distance = ScoringEngine::distance(round.city.lat, round.city.lng, lat, lng);
        let guess = Guess {
            player_id,
            lat,
            lng,
            distance,
            placement_points: 0,
            bonus_points: ScoringEngine::bonus_points(distance),
            total_points: 0,
            placement: 0,
            timestamp: now,
        };
        round.guesses.push(guess.clone());

        let all_humans_guessed = players
            .iter()
            .filter(|p| !p.is_computer)
            .all(|p| round.has_guessed(p.id));
        let all_guessed = players.iter().all(|p| round.has_guessed(p.id));

        Ok(SubmittedGuess {
            round_id: round.id,
            guess,
            late,
            all_humans_guessed,
            all_guessed,
        })
    }

    /// Score and close the round. Only the first call for a given active round
    /// does anything; later or stale calls return `None`.
    pub fn complete_round(&mut self, round_id: RoundId, now: i64) -> Option<GameRound> {
        let total_players = self.game.players.len();
        let round = self
            .game
            .rounds
            .last_mut()
            .filter(|r| r.id == round_id && !r.completed)?;

        ScoringEngine::score_round(round, total_players);
        round.completed = true;
        round.end_time = Some(now);
        debug!(
            "Completed round {} with {} of {} guesses",
            round.id,
            round.guesses.len(),
            total_players
        );
        Some(round.clone())
    }

    /// Open the next round, or finish once `total_rounds` rounds are complete.
    pub fn advance(
        &mut self,
        requester: PlayerId,
        catalog: &CityCatalog,
        now: i64,
    ) -> Result<RoundAdvance, GameError> {
        if !self.game.is_host(requester) {
            return Err(GameError::NotHost);
        }
        if self.game.status != GameStatus::Playing {
            return Err(GameError::invalid_state(self.game.status.as_str()));
        }
        if self.game.active_round().is_some() {
            return Err(GameError::invalid_state("playing (round in progress)"));
        }

        if self.game.completed_round_count() >= self.game.settings.total_rounds as usize {
            return Ok(RoundAdvance::Finished(self.finish(now)));
        }
        Ok(RoundAdvance::NextRound(self.open_round(catalog, now)?))
    }

    pub fn finish_game(&mut self, now: i64) -> Result<FinalResults, GameError> {
        if self.game.status != GameStatus::Playing {
            return Err(GameError::invalid_state(self.game.status.as_str()));
        }
        Ok(self.finish(now))
    }

    fn finish(&mut self, now: i64) -> FinalResults {
        let totals = self.game.scoreboard();
        let scores: Vec<PlayerScore> = self
            .game
            .players
            .iter()
            .map(|p| PlayerScore {
                player_id: p.id,
                player_name: p.name.clone(),
                is_computer: p.is_computer,
                total_score: totals.get(&p.id).copied().unwrap_or(0),
                final_placement: 0,
            })
            .collect();

        let player_scores = ScoringEngine::final_placement(&scores);
        let winner_ids: Vec<PlayerId> = player_scores
            .iter()
            .filter(|s| s.final_placement == 1)
            .map(|s| s.player_id)
            .collect();

        let results = FinalResults {
            winner_id: winner_ids.first().copied(),
            winner_ids,
            player_scores,
            game_end_time: now,
        };

        debug!(
            "Game {} finished with winners {:?}",
            self.game.id, results.winner_ids
        );
        self.game.status = GameStatus::Finished;
        self.game.final_results = Some(results.clone());
        results
    }
}

fn validate_name(name: &str) -> Result<String, GameError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GameError::forbidden("Name is required"));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(GameError::forbidden("Name is too long"));
    }
    Ok(name.to_string())
}

pub fn validate_settings(settings: &GameSettings, player_count: usize) -> Result<(), GameError> {
    let invalid = |reason: &str| {
        Err(GameError::InvalidSettings {
            reason: reason.to_string(),
        })
    };

    if settings.max_players == 0 || settings.max_players > MAX_PLAYERS_LIMIT {
        return invalid("max_players must be between 1 and 16");
    }
    if (settings.max_players as usize) < player_count {
        return invalid("max_players is below the current player count");
    }
    if !(MIN_ROUND_TIME_MS..=MAX_ROUND_TIME_MS).contains(&settings.round_time_limit_ms) {
        return invalid("round_time_limit_ms must be between 5000 and 300000");
    }
    if settings.total_rounds == 0 || settings.total_rounds > MAX_TOTAL_ROUNDS {
        return invalid("total_rounds must be between 1 and 20");
    }
    Ok(())
}
