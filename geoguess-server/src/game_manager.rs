use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::round_tasks::RoundTasks;
use geoguess_core::{
    AgentSimulator, CityCatalog, GameCleanup, GameEvent, GameEventBus, GameSession,
    ROUND_GRACE_PERIOD_MS, RoundAdvance, generate_join_code, is_valid_join_code, now_millis,
};
use geoguess_persistence::GameStore;
use geoguess_types::{
    FinalResults, Game, GameError, GameId, GameRound, GameSettings, GameStatus, Player, PlayerId,
    RoundId,
};

const JOIN_CODE_ATTEMPTS: usize = 20;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub default_settings: GameSettings,
    pub grace_period_ms: i64,
    pub cleanup: GameCleanup,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_settings: GameSettings::default(),
            grace_period_ms: ROUND_GRACE_PERIOD_MS,
            cleanup: GameCleanup::default(),
        }
    }
}

type SessionHandle = Arc<Mutex<GameSession>>;

/// Log a store failure and turn it into the error returned to the requester.
fn store_failure(operation: &str, game_id: GameId, err: anyhow::Error) -> GameError {
    error!("Failed to {} for game {}: {:#}", operation, game_id, err);
    GameError::Internal {
        message: format!("Failed to {}", operation),
    }
}

fn persisted<T>(
    operation: &str,
    game_id: GameId,
    result: anyhow::Result<Option<T>>,
) -> Result<(), GameError> {
    match result {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(store_failure(
            operation,
            game_id,
            anyhow::anyhow!("record missing from store"),
        )),
        Err(err) => Err(store_failure(operation, game_id, err)),
    }
}

/// Owns every running game.
///
/// Each game lives behind its own mutex; commands, round timers and agent
/// tasks all go through it, so a round's guess list and completed flag only
/// change under that lock. Client commands run against a draft of the session
/// and only replace it once the store has accepted the write. Timer and agent
/// paths commit in memory first and log store failures, since the round has to
/// resolve either way.
pub struct GameManager {
    games: RwLock<HashMap<GameId, SessionHandle>>,
    codes: RwLock<HashMap<String, GameId>>,
    store: Arc<dyn GameStore>,
    catalog: Arc<CityCatalog>,
    agent: Arc<AgentSimulator>,
    event_bus: GameEventBus,
    round_tasks: RoundTasks,
    config: ManagerConfig,
    clock_origin: tokio::time::Instant,
    clock_origin_ms: i64,
}

impl GameManager {
    pub fn new(
        store: Arc<dyn GameStore>,
        catalog: Arc<CityCatalog>,
        agent: Arc<AgentSimulator>,
        event_bus: GameEventBus,
        config: ManagerConfig,
    ) -> Self {
        Self {
            games: RwLock::new(HashMap::new()),
            codes: RwLock::new(HashMap::new()),
            store,
            catalog,
            agent,
            event_bus,
            round_tasks: RoundTasks::new(),
            config,
            clock_origin: tokio::time::Instant::now(),
            clock_origin_ms: now_millis(),
        }
    }

    /// Epoch milliseconds, advanced by the tokio clock so paused-time runs see
    /// round timestamps move with their timers.
    fn now(&self) -> i64 {
        self.clock_origin_ms + self.clock_origin.elapsed().as_millis() as i64
    }

    async fn session(&self, game_id: GameId) -> Result<SessionHandle, GameError> {
        self.games
            .read()
            .await
            .get(&game_id)
            .cloned()
            .ok_or_else(|| GameError::not_found("Game"))
    }

    async fn unused_join_code(&self) -> Result<String, GameError> {
        for _ in 0..JOIN_CODE_ATTEMPTS {
            let code = generate_join_code();
            if self.codes.read().await.contains_key(&code) {
                continue;
            }
            match self.store.get_game_by_code(&code).await {
                Ok(None) => return Ok(code),
                Ok(Some(_)) => continue,
                Err(err) => {
                    error!("Failed to check join code {}: {:#}", code, err);
                    return Err(GameError::Internal {
                        message: "Failed to allocate join code".to_string(),
                    });
                }
            }
        }
        Err(GameError::Internal {
            message: "No free join code".to_string(),
        })
    }

    pub async fn create_game(&self, host_name: &str) -> Result<(Game, PlayerId), GameError> {
        let code = self.unused_join_code().await?;
        let session = GameSession::create(
            code.clone(),
            host_name,
            self.config.default_settings.clone(),
            self.now(),
        )?;
        let game_id = session.game.id;
        let host_id = session.game.host_id;

        self.store
            .create_game(&session.game)
            .await
            .map_err(|err| store_failure("create game", game_id, err))?;

        let snapshot = session.snapshot();
        self.games
            .write()
            .await
            .insert(game_id, Arc::new(Mutex::new(session)));
        self.codes.write().await.insert(code.clone(), game_id);

        info!("Created game {} with code {}", game_id, code);
        Ok((snapshot, host_id))
    }

    pub async fn join_game(&self, code: &str, name: &str) -> Result<(Game, PlayerId), GameError> {
        if !is_valid_join_code(code) {
            return Err(GameError::not_found("Game"));
        }
        let game_id = self
            .codes
            .read()
            .await
            .get(code)
            .copied()
            .ok_or_else(|| GameError::not_found("Game"))?;

        let handle = self.session(game_id).await?;
        let mut session = handle.lock().await;

        let mut draft = session.clone();
        let player = draft.add_player(name)?;
        persisted(
            "add player",
            game_id,
            self.store.add_player(game_id, &player).await,
        )?;
        *session = draft;
        session.touch();

        info!("Player {} joined game {}", player.id, game_id);
        let snapshot = session.snapshot();
        self.event_bus.publish(GameEvent::GameUpdated {
            game: snapshot.clone(),
        });
        Ok((snapshot, player.id))
    }

    /// Reattach a known player, e.g. after a dropped connection.
    pub async fn rejoin_game(&self, game_id: GameId, player_id: PlayerId) -> Result<Game, GameError> {
        let handle = self.session(game_id).await?;
        let mut session = handle.lock().await;
        if session.game.player(player_id).is_none() {
            return Err(GameError::not_found("Player"));
        }
        session.touch();
        info!("Player {} rejoined game {}", player_id, game_id);
        Ok(session.snapshot())
    }

    pub async fn add_computer_players(
        &self,
        game_id: GameId,
        requester: PlayerId,
        count: u32,
    ) -> Result<Game, GameError> {
        let handle = self.session(game_id).await?;
        let mut session = handle.lock().await;
        if !session.game.is_host(requester) {
            return Err(GameError::NotHost);
        }

        let mut draft = session.clone();
        let added = draft.add_computer_players(count, &self.agent)?;
        for (written, player) in added.iter().enumerate() {
            if let Err(err) = persisted(
                "add computer player",
                game_id,
                self.store.add_player(game_id, player).await,
            ) {
                self.remove_stored_players(game_id, &added[..written]).await;
                return Err(err);
            }
        }
        *session = draft;
        session.touch();

        info!("Added {} computer players to game {}", added.len(), game_id);
        let snapshot = session.snapshot();
        self.event_bus.publish(GameEvent::GameUpdated {
            game: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Undo the rows of a partially written batch of players.
    async fn remove_stored_players(&self, game_id: GameId, players: &[Player]) {
        for player in players {
            match self.store.remove_player(game_id, player.id).await {
                Ok(_) => debug!("Rolled back player {} in game {}", player.id, game_id),
                Err(err) => error!(
                    "Failed to roll back player {} in game {}: {:#}",
                    player.id, game_id, err
                ),
            }
        }
    }

    pub async fn leave_game(&self, game_id: GameId, player_id: PlayerId) -> Result<Game, GameError> {
        let handle = self.session(game_id).await?;
        let mut session = handle.lock().await;

        let mut draft = session.clone();
        draft.remove_player(player_id)?;
        persisted(
            "remove player",
            game_id,
            self.store.remove_player(game_id, player_id).await,
        )?;
        *session = draft;
        session.touch();

        info!("Player {} left game {}", player_id, game_id);
        let snapshot = session.snapshot();
        self.event_bus.publish(GameEvent::GameUpdated {
            game: snapshot.clone(),
        });
        Ok(snapshot)
    }

    pub async fn update_settings(
        &self,
        game_id: GameId,
        requester: PlayerId,
        settings: GameSettings,
    ) -> Result<Game, GameError> {
        let handle = self.session(game_id).await?;
        let mut session = handle.lock().await;

        let mut draft = session.clone();
        draft.update_settings(requester, settings)?;
        persisted(
            "update settings",
            game_id,
            self.store
                .update_game_settings(game_id, &draft.game.settings)
                .await,
        )?;
        *session = draft;
        session.touch();

        let snapshot = session.snapshot();
        self.event_bus.publish(GameEvent::GameUpdated {
            game: snapshot.clone(),
        });
        Ok(snapshot)
    }

    pub async fn start_game(
        self: &Arc<Self>,
        game_id: GameId,
        requester: PlayerId,
    ) -> Result<Game, GameError> {
        let handle = self.session(game_id).await?;
        let mut session = handle.lock().await;

        let mut draft = session.clone();
        let round = draft.start(requester, &self.catalog, self.now())?;
        persisted(
            "start game",
            game_id,
            self.store
                .update_game_status(game_id, GameStatus::Playing)
                .await,
        )?;
        if let Err(err) = persisted(
            "create round",
            game_id,
            self.store.create_round(game_id, &round).await,
        ) {
            if let Err(revert) = self
                .store
                .update_game_status(game_id, GameStatus::Waiting)
                .await
            {
                error!(
                    "Failed to reset status of game {} after a failed start: {:#}",
                    game_id, revert
                );
            }
            return Err(err);
        }
        *session = draft;
        session.touch();

        info!(
            "Game {} started, round 1 targets {}",
            game_id, round.city.name
        );
        self.schedule_round_timer(game_id, round.id, session.game.settings.round_time_limit_ms);

        let snapshot = session.snapshot();
        self.event_bus.publish(GameEvent::RoundStarted {
            game: snapshot.clone(),
            round,
        });
        Ok(snapshot)
    }

    pub async fn submit_guess(
        self: &Arc<Self>,
        game_id: GameId,
        player_id: PlayerId,
        lat: f64,
        lng: f64,
    ) -> Result<Game, GameError> {
        let handle = self.session(game_id).await?;
        let mut session = handle.lock().await;

        let mut draft = session.clone();
        let submitted =
            draft.submit_guess(player_id, lat, lng, self.now(), self.config.grace_period_ms)?;
        persisted(
            "record guess",
            game_id,
            self.store
                .add_guess(submitted.round_id, &submitted.guess)
                .await,
        )?;
        *session = draft;
        session.touch();

        if submitted.late {
            info!(
                "Late guess from {} accepted for closed round {}",
                player_id, submitted.round_id
            );
        } else if submitted.all_guessed {
            self.end_round(&mut session, submitted.round_id).await;
            return Ok(session.snapshot());
        } else if submitted.all_humans_guessed {
            self.schedule_agents(&session, submitted.round_id);
        }

        let snapshot = session.snapshot();
        self.event_bus.publish(GameEvent::GameUpdated {
            game: snapshot.clone(),
        });
        Ok(snapshot)
    }

    pub async fn next_round(
        self: &Arc<Self>,
        game_id: GameId,
        requester: PlayerId,
    ) -> Result<Game, GameError> {
        let handle = self.session(game_id).await?;
        let mut session = handle.lock().await;

        let mut draft = session.clone();
        match draft.advance(requester, &self.catalog, self.now())? {
            RoundAdvance::NextRound(round) => {
                persisted(
                    "create round",
                    game_id,
                    self.store.create_round(game_id, &round).await,
                )?;
                *session = draft;
                session.touch();

                self.round_tasks.cancel_game(game_id);
                self.schedule_round_timer(
                    game_id,
                    round.id,
                    session.game.settings.round_time_limit_ms,
                );
                info!(
                    "Game {} round {} targets {}",
                    game_id,
                    session.game.rounds.len(),
                    round.city.name
                );

                let snapshot = session.snapshot();
                self.event_bus.publish(GameEvent::RoundStarted {
                    game: snapshot.clone(),
                    round,
                });
                Ok(snapshot)
            }
            RoundAdvance::Finished(results) => {
                self.store_final_results(game_id, &results).await?;
                *session = draft;
                session.touch();
                self.announce_finish(&session, results);
                Ok(session.snapshot())
            }
        }
    }

    /// Finish a running game now, scoring whatever has been played.
    pub async fn finish_game(&self, game_id: GameId) -> Result<FinalResults, GameError> {
        let handle = self.session(game_id).await?;
        let mut session = handle.lock().await;

        let mut draft = session.clone();
        let results = draft.finish_game(self.now())?;
        self.store_final_results(game_id, &results).await?;
        *session = draft;
        session.touch();

        self.announce_finish(&session, results.clone());
        Ok(results)
    }

    async fn store_final_results(
        &self,
        game_id: GameId,
        results: &FinalResults,
    ) -> Result<(), GameError> {
        persisted(
            "store final results",
            game_id,
            self.store.update_game_final_results(game_id, results).await,
        )?;
        persisted(
            "finish game",
            game_id,
            self.store
                .update_game_status(game_id, GameStatus::Finished)
                .await,
        )
    }

    fn announce_finish(&self, session: &GameSession, final_results: FinalResults) {
        let game_id = session.game.id;
        let cancelled = self.round_tasks.cancel_game(game_id);
        if cancelled > 0 {
            debug!("Cancelled {} pending round tasks for game {}", cancelled, game_id);
        }

        info!(
            "Game {} finished, winners: {:?}",
            game_id, final_results.winner_ids
        );
        self.event_bus.publish(GameEvent::GameFinished {
            game: session.snapshot(),
            final_results,
        });
    }

    fn schedule_round_timer(self: &Arc<Self>, game_id: GameId, round_id: RoundId, limit_ms: u64) {
        let token = self.round_tasks.register(game_id, round_id);
        let manager = Arc::clone(self);
        let limit = Duration::from_millis(limit_ms);

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Timer for round {} cancelled", round_id);
                }
                _ = tokio::time::sleep(limit) => {
                    manager.on_round_timer_expire(game_id, round_id).await;
                }
            }
        });
    }

    /// Give each computer player that still owes a guess its own think delay.
    fn schedule_agents(self: &Arc<Self>, session: &GameSession, round_id: RoundId) {
        let pending = session.pending_computer_players(round_id);
        if pending.is_empty() {
            return;
        }
        let Some(token) = self.round_tasks.schedule_agents(round_id) else {
            return;
        };

        let game_id = session.game.id;
        debug!(
            "Scheduling {} computer guesses for round {}",
            pending.len(),
            round_id
        );

        for player in pending {
            let manager = Arc::clone(self);
            let token = token.clone();
            let delay = self.agent.think_time();

            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        manager.agent_guess(game_id, round_id, player.id).await;
                    }
                }
            });
        }
    }

    async fn agent_guess(&self, game_id: GameId, round_id: RoundId, player_id: PlayerId) {
        let Ok(handle) = self.session(game_id).await else {
            return;
        };
        let mut session = handle.lock().await;

        let Some(all_guessed) = self.simulate_and_record(&mut session, round_id, player_id).await
        else {
            debug!(
                "Dropped stale computer guess from {} for round {}",
                player_id, round_id
            );
            return;
        };

        if all_guessed {
            self.end_round(&mut session, round_id).await;
        } else {
            self.event_bus.publish(GameEvent::GameUpdated {
                game: session.snapshot(),
            });
        }
    }

    /// Record one simulated guess. Returns whether every player has now guessed,
    /// or `None` if the round moved on or the agent already answered.
    async fn simulate_and_record(
        &self,
        session: &mut GameSession,
        round_id: RoundId,
        player_id: PlayerId,
    ) -> Option<bool> {
        let round = session.game.active_round().filter(|r| r.id == round_id)?;
        let accuracy = session.game.player(player_id)?.accuracy.unwrap_or(0.5);
        let location = self.agent.simulate_guess(&round.city, accuracy);

        let submitted = session.record_agent_guess(round_id, player_id, location, self.now())?;
        if let Err(err) = self.store.add_guess(round_id, &submitted.guess).await {
            error!("Failed to store computer guess for round {}: {:#}", round_id, err);
        }
        Some(submitted.all_guessed)
    }

    /// Round timer callback. Computer players that are still thinking are
    /// forced to guess so the round always resolves.
    pub async fn on_round_timer_expire(&self, game_id: GameId, round_id: RoundId) {
        let Ok(handle) = self.session(game_id).await else {
            return;
        };
        let mut session = handle.lock().await;
        if !session.is_round_active(round_id) {
            debug!("Ignoring stale timer for round {}", round_id);
            return;
        }

        for player in session.pending_computer_players(round_id) {
            self.simulate_and_record(&mut session, round_id, player.id)
                .await;
        }

        info!("Round {} of game {} timed out", round_id, game_id);
        self.end_round(&mut session, round_id).await;
    }

    /// Score and close the round. Only the first caller for a given round
    /// does anything.
    async fn end_round(&self, session: &mut GameSession, round_id: RoundId) -> Option<GameRound> {
        let Some(round) = session.complete_round(round_id, self.now()) else {
            debug!("Round {} already completed", round_id);
            return None;
        };
        let game_id = session.game.id;
        self.round_tasks.cancel(round_id);

        if let Err(err) = self
            .store
            .complete_round(round_id, round.end_time.unwrap_or_default())
            .await
        {
            error!("Failed to store completion of round {}: {:#}", round_id, err);
        }
        for guess in &round.guesses {
            if let Err(err) = self.store.update_guess(round_id, guess).await {
                error!("Failed to store score for round {}: {:#}", round_id, err);
            }
        }

        info!(
            "Round {} of game {} completed with {} guesses",
            round_id,
            game_id,
            round.guesses.len()
        );
        self.event_bus.publish(GameEvent::RoundResults {
            game: session.snapshot(),
            round: round.clone(),
        });
        Some(round)
    }

    pub async fn get_game(&self, game_id: GameId) -> Result<Game, GameError> {
        if let Ok(handle) = self.session(game_id).await {
            return Ok(handle.lock().await.snapshot());
        }

        match self.store.get_game_by_id(game_id).await {
            Ok(Some(game)) => Ok(game.with_projected_scores()),
            Ok(None) => Err(GameError::not_found("Game")),
            Err(err) => Err(store_failure("load game", game_id, err)),
        }
    }

    pub async fn get_game_by_code(&self, code: &str) -> Result<Game, GameError> {
        if !is_valid_join_code(code) {
            return Err(GameError::not_found("Game"));
        }

        let cached = self.codes.read().await.get(code).copied();
        if let Some(game_id) = cached {
            return self.get_game(game_id).await;
        }

        match self.store.get_game_by_code(code).await {
            Ok(Some(game)) => Ok(game.with_projected_scores()),
            Ok(None) => Err(GameError::not_found("Game")),
            Err(err) => {
                error!("Failed to look up game code {}: {:#}", code, err);
                Err(GameError::Internal {
                    message: "Failed to load game".to_string(),
                })
            }
        }
    }

    /// Drop finished and idle games from memory. The store keeps their record.
    pub async fn cleanup_games(&self) -> usize {
        let sessions: Vec<(GameId, SessionHandle)> = self
            .games
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();

        let mut evicted = Vec::new();
        for (game_id, handle) in sessions {
            let session = handle.lock().await;
            if let Some(reason) = self.config.cleanup.should_evict(&session) {
                evicted.push((game_id, session.game.code.clone(), reason));
            }
        }

        if evicted.is_empty() {
            return 0;
        }

        let mut games = self.games.write().await;
        let mut codes = self.codes.write().await;
        for (game_id, code, reason) in &evicted {
            games.remove(game_id);
            codes.remove(code);
            self.round_tasks.cancel_game(*game_id);
            info!("Evicted game {} ({})", game_id, reason.as_str());
        }
        evicted.len()
    }

    pub async fn active_game_count(&self) -> usize {
        self.games.read().await.len()
    }

    pub fn pending_round_tasks(&self) -> usize {
        self.round_tasks.pending_count()
    }

    pub fn is_round_timer_pending(&self, round_id: RoundId) -> bool {
        self.round_tasks.is_pending(round_id)
    }
}
