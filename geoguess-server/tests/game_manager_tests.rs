
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use geoguess_core::{AgentSimulator, GameCleanup, GameEventBus, ROUND_GRACE_PERIOD_MS};
use geoguess_persistence::{GameStore, MemoryGameStore};
use geoguess_server::game_manager::{GameManager, ManagerConfig};
use geoguess_types::{
    FinalResults, Game, GameError, GameId, GameRound, GameSettings, GameStatus, Guess, Player,
    PlayerId, RoundId,
};
use std::sync::{Arc, Mutex as StdMutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use test_helpers::*;

#[tokio::test]
async fn test_create_and_join_game() {
    let setup = TestSetup::new(3);
    let (game, host_id) = setup.game_manager.create_game("Alice").await.unwrap();
    assert_eq!(game.host_id, host_id);
    assert_eq!(game.status, GameStatus::Waiting);
    assert_eq!(game.code.len(), 6);

    let (joined, bob_id) = setup.game_manager.join_game(&game.code, "Bob").await.unwrap();
    assert_eq!(joined.players.len(), 2);
    assert!(joined.player(bob_id).is_some());

    let by_code = setup.game_manager.get_game_by_code(&game.code).await.unwrap();
    assert_eq!(by_code.id, game.id);

    let stored = setup.store.get_game_by_id(game.id).await.unwrap().unwrap();
    assert_eq!(stored.players.len(), 2);
}

#[tokio::test]
async fn test_join_rejections() {
    let setup = TestSetup::new(3);
    let (game, _) = setup.game_manager.create_game("Alice").await.unwrap();

    let unknown = setup.game_manager.join_game("999999", "Bob").await;
    assert_eq!(unknown.unwrap_err(), GameError::not_found("Game"));

    let taken = setup.game_manager.join_game(&game.code, "alice").await;
    assert_eq!(
        taken.unwrap_err(),
        GameError::forbidden("Name is already taken")
    );
}

#[tokio::test]
async fn test_only_host_controls_lobby() {
    let setup = TestSetup::new(3);
    let (game_id, players) = setup.create_lobby(&["Bob"]).await;
    let (host, bob) = (players[0], players[1]);

    let result = setup.game_manager.start_game(game_id, bob).await;
    assert_eq!(result.unwrap_err(), GameError::NotHost);

    let result = setup.game_manager.add_computer_players(game_id, bob, 1).await;
    assert_eq!(result.unwrap_err(), GameError::NotHost);

    let settings = GameSettings {
        total_rounds: 7,
        ..test_settings(3)
    };
    let result = setup
        .game_manager
        .update_settings(game_id, bob, settings.clone())
        .await;
    assert_eq!(result.unwrap_err(), GameError::NotHost);

    let updated = setup
        .game_manager
        .update_settings(game_id, host, settings)
        .await
        .unwrap();
    assert_eq!(updated.settings.total_rounds, 7);

    let result = setup.game_manager.leave_game(game_id, host).await;
    assert!(matches!(result, Err(GameError::Forbidden { .. })));

    let after_leave = setup.game_manager.leave_game(game_id, bob).await.unwrap();
    assert_eq!(after_leave.players.len(), 1);
    let stored = setup.store.get_game_by_id(game_id).await.unwrap().unwrap();
    assert_eq!(stored.players.len(), 1);
}

#[tokio::test]
async fn test_round_completes_when_everyone_guessed() {
    let setup = TestSetup::new(3);
    let (game_id, players) = setup.create_lobby(&["Bob"]).await;

    let started = setup.game_manager.start_game(game_id, players[0]).await.unwrap();
    assert_eq!(started.status, GameStatus::Playing);
    let round_id = started.rounds[0].id;
    assert!(setup.game_manager.is_round_timer_pending(round_id));

    setup.guess_near_target(game_id, players[0], 0.1).await;
    let game = setup.game(game_id).await;
    assert!(!game.rounds[0].completed);

    setup.guess_near_target(game_id, players[1], 8.0).await;
    let game = setup.game(game_id).await;
    let round = &game.rounds[0];
    assert!(round.completed);
    assert!(!setup.game_manager.is_round_timer_pending(round_id));

    // Closest guess takes the round
    let alice = round.guesses.iter().find(|g| g.player_id == players[0]).unwrap();
    let bob = round.guesses.iter().find(|g| g.player_id == players[1]).unwrap();
    assert_eq!(alice.placement, 1);
    assert_eq!(bob.placement, 2);
    assert!(alice.total_points > bob.total_points);
    assert_eq!(setup.events.count(is_round_results), 1);

    let stored = setup.store.get_game_by_id(game_id).await.unwrap().unwrap();
    assert!(stored.rounds[0].completed);
    assert_eq!(stored.rounds[0].guesses.len(), 2);
    assert_eq!(stored.rounds[0].guesses[0].total_points, alice.total_points);
}

#[tokio::test]
async fn test_guess_validation() {
    let setup = TestSetup::new(3);
    let (game_id, players) = setup.create_lobby(&["Bob"]).await;

    let early = setup.game_manager.submit_guess(game_id, players[0], 0.0, 0.0).await;
    assert!(matches!(early, Err(GameError::InvalidState { .. })));

    setup.game_manager.start_game(game_id, players[0]).await.unwrap();

    let out_of_range = setup.game_manager.submit_guess(game_id, players[0], 91.0, 0.0).await;
    assert!(matches!(out_of_range, Err(GameError::Forbidden { .. })));

    let stranger = setup
        .game_manager
        .submit_guess(game_id, uuid::Uuid::new_v4(), 0.0, 0.0)
        .await;
    assert_eq!(stranger.unwrap_err(), GameError::not_found("Player"));

    setup.guess_near_target(game_id, players[0], 1.0).await;
    let twice = setup.game_manager.submit_guess(game_id, players[0], 0.0, 0.0).await;
    assert_eq!(twice.unwrap_err(), GameError::DuplicateGuess);
}

#[tokio::test(start_paused = true)]
async fn test_round_timer_closes_round() {
    let setup = TestSetup::new(3);
    let (game_id, players) = setup.create_lobby(&["Bob"]).await;
    let started = setup.game_manager.start_game(game_id, players[0]).await.unwrap();
    let round_id = started.rounds[0].id;

    setup.guess_near_target(game_id, players[0], 2.0).await;

    advance(Duration::from_millis(29_000)).await;
    assert!(!setup.game(game_id).await.rounds[0].completed);

    advance(Duration::from_millis(1_500)).await;
    let game = setup.game(game_id).await;
    assert!(game.rounds[0].completed);
    assert_eq!(game.rounds[0].guesses.len(), 1);
    assert!(!setup.game_manager.is_round_timer_pending(round_id));
    assert_eq!(setup.events.count(is_round_results), 1);

    // Bob is still inside the grace window
    let late = setup
        .game_manager
        .submit_guess(game_id, players[1], 10.0, 10.0)
        .await
        .unwrap();
    let bob = late.rounds[0]
        .guesses
        .iter()
        .find(|g| g.player_id == players[1])
        .unwrap();
    assert_eq!(bob.total_points, 0);
    assert_eq!(bob.placement, 0);
    assert_eq!(setup.events.count(is_round_results), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_guess_after_grace_window_rejected() {
    let setup = TestSetup::new(3);
    let (game_id, players) = setup.create_lobby(&["Bob"]).await;
    setup.game_manager.start_game(game_id, players[0]).await.unwrap();

    advance(Duration::from_millis(30_100)).await;
    assert!(setup.game(game_id).await.rounds[0].completed);

    advance(Duration::from_millis(ROUND_GRACE_PERIOD_MS as u64)).await;
    let result = setup.game_manager.submit_guess(game_id, players[1], 0.0, 0.0).await;
    assert_eq!(result.unwrap_err(), GameError::RoundClosed);
}

#[tokio::test(start_paused = true)]
async fn test_computer_players_guess_after_humans() {
    let setup = TestSetup::new(3);
    let (game_id, players) = setup.create_lobby(&[]).await;
    let lobby = setup
        .game_manager
        .add_computer_players(game_id, players[0], 2)
        .await
        .unwrap();
    assert_eq!(lobby.computer_players().count(), 2);

    setup.game_manager.start_game(game_id, players[0]).await.unwrap();

    // Computers wait for the humans
    advance(Duration::from_millis(10_000)).await;
    assert_eq!(setup.game(game_id).await.rounds[0].guesses.len(), 0);

    setup.guess_near_target(game_id, players[0], 1.0).await;
    advance(Duration::from_millis(5_100)).await;

    let game = setup.game(game_id).await;
    let round = &game.rounds[0];
    assert!(round.completed);
    assert_eq!(round.guesses.len(), 3);
    assert_eq!(setup.events.count(is_round_results), 1);
    assert_eq!(setup.game_manager.pending_round_tasks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timer_forces_pending_computer_guesses() {
    let setup = TestSetup::new(3);
    let (game_id, players) = setup.create_lobby(&["Bob"]).await;
    setup
        .game_manager
        .add_computer_players(game_id, players[0], 1)
        .await
        .unwrap();
    setup.game_manager.start_game(game_id, players[0]).await.unwrap();

    // Bob never guesses, so the computer is only forced at the deadline
    setup.guess_near_target(game_id, players[0], 1.0).await;
    advance(Duration::from_millis(20_000)).await;
    assert_eq!(setup.game(game_id).await.rounds[0].guesses.len(), 1);

    advance(Duration::from_millis(10_100)).await;
    let game = setup.game(game_id).await;
    let round = &game.rounds[0];
    assert!(round.completed);
    assert_eq!(round.guesses.len(), 2);
    assert!(!round.has_guessed(players[1]));
}

#[tokio::test]
async fn test_stale_and_repeated_timers_are_ignored() {
    let setup = TestSetup::new(3);
    let (game_id, players) = setup.create_lobby(&[]).await;
    let host = players[0];

    let first = setup.game_manager.start_game(game_id, host).await.unwrap();
    let first_round = first.rounds[0].id;
    setup.guess_near_target(game_id, host, 1.0).await;

    let second = setup.game_manager.next_round(game_id, host).await.unwrap();
    let second_round = second.rounds[1].id;
    assert_ne!(first.rounds[0].city.name, second.rounds[1].city.name);
    assert!(setup.game_manager.is_round_timer_pending(second_round));

    setup.game_manager.on_round_timer_expire(game_id, first_round).await;
    assert!(!setup.game(game_id).await.rounds[1].completed);
    assert_eq!(setup.events.count(is_round_results), 1);

    setup.game_manager.on_round_timer_expire(game_id, second_round).await;
    setup.game_manager.on_round_timer_expire(game_id, second_round).await;
    assert!(setup.game(game_id).await.rounds[1].completed);
    assert_eq!(setup.events.count(is_round_results), 2);
}

#[tokio::test]
async fn test_next_round_requires_closed_round() {
    let setup = TestSetup::new(3);
    let (game_id, players) = setup.create_lobby(&["Bob"]).await;
    setup.game_manager.start_game(game_id, players[0]).await.unwrap();

    let result = setup.game_manager.next_round(game_id, players[0]).await;
    assert!(matches!(result, Err(GameError::InvalidState { .. })));
}

#[tokio::test]
async fn test_full_game_to_final_results() {
    let setup = TestSetup::new(2);
    let (game_id, players) = setup.create_lobby(&["Bob"]).await;
    let (host, bob) = (players[0], players[1]);

    setup.game_manager.start_game(game_id, host).await.unwrap();
    for _ in 0..2 {
        setup.guess_near_target(game_id, host, 0.5).await;
        setup.guess_near_target(game_id, bob, 6.0).await;
        setup.game_manager.next_round(game_id, host).await.unwrap();
    }

    let game = setup.game(game_id).await;
    assert_eq!(game.status, GameStatus::Finished);
    assert_eq!(game.rounds.len(), 2);

    let results = game.final_results.clone().unwrap();
    assert_eq!(results.winner_ids, vec![host]);
    assert_eq!(results.player_scores[0].player_id, host);
    assert_eq!(results.player_scores[0].final_placement, 1);
    assert_eq!(
        game.player(host).unwrap().score,
        results.player_scores[0].total_score
    );

    assert_eq!(setup.events.count(is_game_finished), 1);
    assert_eq!(setup.game_manager.pending_round_tasks(), 0);

    let stored = setup.store.get_game_by_id(game_id).await.unwrap().unwrap();
    assert_eq!(stored.status, GameStatus::Finished);
    assert_eq!(stored.final_results, Some(results));

    let again = setup.game_manager.next_round(game_id, host).await;
    assert!(matches!(again, Err(GameError::InvalidState { .. })));
}

#[tokio::test]
async fn test_finish_game_early() {
    let setup = TestSetup::new(5);
    let (game_id, players) = setup.create_lobby(&["Bob"]).await;
    setup.game_manager.start_game(game_id, players[0]).await.unwrap();
    setup.guess_near_target(game_id, players[0], 1.0).await;
    setup.guess_near_target(game_id, players[1], 3.0).await;

    let results = setup.game_manager.finish_game(game_id).await.unwrap();
    assert_eq!(results.player_scores.len(), 2);
    assert_eq!(results.winner_id, Some(players[0]));
    assert_eq!(setup.game(game_id).await.status, GameStatus::Finished);

    let again = setup.game_manager.finish_game(game_id).await;
    assert!(matches!(again, Err(GameError::InvalidState { .. })));
}

#[tokio::test]
async fn test_cleanup_evicts_finished_games() {
    let setup = TestSetup::with_config(ManagerConfig {
        default_settings: test_settings(1),
        grace_period_ms: ROUND_GRACE_PERIOD_MS,
        cleanup: GameCleanup::new(Duration::from_secs(3600), Duration::ZERO),
    });

    let (finished_id, players) = setup.create_lobby(&[]).await;
    setup.game_manager.start_game(finished_id, players[0]).await.unwrap();
    setup.guess_near_target(finished_id, players[0], 1.0).await;
    setup.game_manager.next_round(finished_id, players[0]).await.unwrap();

    let (waiting_id, _) = setup.create_lobby(&[]).await;
    assert_eq!(setup.game_manager.active_game_count().await, 2);

    assert_eq!(setup.game_manager.cleanup_games().await, 1);
    assert_eq!(setup.game_manager.active_game_count().await, 1);
    assert_eq!(setup.game(waiting_id).await.status, GameStatus::Waiting);

    // Evicted games are still readable from the store
    let archived = setup.game(finished_id).await;
    assert_eq!(archived.status, GameStatus::Finished);
    assert!(archived.final_results.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_last_guess_racing_timer_ends_round_once() {
    for _ in 0..25 {
        let setup = TestSetup::new(3);
        let (game_id, players) = setup.create_lobby(&["Bob"]).await;
        let started = setup.game_manager.start_game(game_id, players[0]).await.unwrap();
        let round_id = started.rounds[0].id;
        let city = started.rounds[0].city.clone();
        setup.guess_near_target(game_id, players[0], 1.0).await;

        let guessing = {
            let game_manager = setup.game_manager.clone();
            let bob = players[1];
            tokio::spawn(async move {
                game_manager
                    .submit_guess(game_id, bob, city.lat, city.lng)
                    .await
            })
        };
        let expiring = {
            let game_manager = setup.game_manager.clone();
            tokio::spawn(async move { game_manager.on_round_timer_expire(game_id, round_id).await })
        };
        let (guess, expired) = tokio::join!(guessing, expiring);
        expired.unwrap();
        match guess.unwrap() {
            Ok(_) | Err(GameError::RoundClosed) => {}
            Err(other) => panic!("unexpected guess error: {:?}", other),
        }

        let round = &setup.game(game_id).await.rounds[0];
        assert!(round.completed);
        assert_eq!(setup.events.count(is_round_results), 1);
        assert!(!setup.game_manager.is_round_timer_pending(round_id));
    }
}

#[tokio::test]
async fn test_guess_after_next_round_counts_for_new_round() {
    let setup = TestSetup::new(3);
    let (game_id, players) = setup.create_lobby(&["Bob"]).await;
    let (host, bob) = (players[0], players[1]);
    setup.game_manager.start_game(game_id, host).await.unwrap();
    setup.guess_near_target(game_id, host, 1.0).await;
    setup.guess_near_target(game_id, bob, 2.0).await;
    setup.game_manager.next_round(game_id, host).await.unwrap();

    // Guesses carry no round id; they always address the latest round
    let game = setup.guess_near_target(game_id, bob, 3.0).await;
    assert_eq!(game.rounds[0].guesses.len(), 2);
    assert_eq!(game.rounds[1].guesses.len(), 1);
    assert!(game.rounds[1].has_guessed(bob));
    assert!(!game.rounds[1].completed);
}

/// Store whose writes can be switched off to simulate an outage
#[derive(Default)]
struct FlakyStore {
    inner: MemoryGameStore,
    /// Every write fails while set
    failing: AtomicBool,
    /// Only the named write fails while set
    failing_write: StdMutex<Option<&'static str>>,
    /// `add_player` calls that still succeed before the next ones fail
    player_writes_left: StdMutex<Option<usize>>,
}

impl FlakyStore {
    fn fail_only(&self, write: &'static str) {
        *self.failing_write.lock().unwrap() = Some(write);
    }

    fn fail_players_after(&self, successes: usize) {
        *self.player_writes_left.lock().unwrap() = Some(successes);
    }

    fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
        *self.failing_write.lock().unwrap() = None;
        *self.player_writes_left.lock().unwrap() = None;
    }

    fn check(&self, write: &'static str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) || *self.failing_write.lock().unwrap() == Some(write)
        {
            return Err(anyhow!("database unavailable"));
        }
        if write == "add_player" {
            if let Some(left) = self.player_writes_left.lock().unwrap().as_mut() {
                if *left == 0 {
                    return Err(anyhow!("database unavailable"));
                }
                *left -= 1;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl GameStore for FlakyStore {
    async fn create_game(&self, game: &Game) -> Result<Game> {
        self.check("create_game")?;
        self.inner.create_game(game).await
    }

    async fn get_game_by_id(&self, game_id: GameId) -> Result<Option<Game>> {
        self.inner.get_game_by_id(game_id).await
    }

    async fn get_game_by_code(&self, code: &str) -> Result<Option<Game>> {
        self.inner.get_game_by_code(code).await
    }

    async fn add_player(&self, game_id: GameId, player: &Player) -> Result<Option<Game>> {
        self.check("add_player")?;
        self.inner.add_player(game_id, player).await
    }

    async fn remove_player(&self, game_id: GameId, player_id: PlayerId) -> Result<Option<Game>> {
        self.check("remove_player")?;
        self.inner.remove_player(game_id, player_id).await
    }

    async fn update_game_status(
        &self,
        game_id: GameId,
        status: GameStatus,
    ) -> Result<Option<Game>> {
        self.check("update_game_status")?;
        self.inner.update_game_status(game_id, status).await
    }

    async fn update_game_settings(
        &self,
        game_id: GameId,
        settings: &GameSettings,
    ) -> Result<Option<Game>> {
        self.check("update_game_settings")?;
        self.inner.update_game_settings(game_id, settings).await
    }

    async fn create_round(&self, game_id: GameId, round: &GameRound) -> Result<Option<Game>> {
        self.check("create_round")?;
        self.inner.create_round(game_id, round).await
    }

    async fn complete_round(&self, round_id: RoundId, end_time: i64) -> Result<Option<Game>> {
        self.check("complete_round")?;
        self.inner.complete_round(round_id, end_time).await
    }

    async fn add_guess(&self, round_id: RoundId, guess: &Guess) -> Result<Option<Game>> {
        self.check("add_guess")?;
        self.inner.add_guess(round_id, guess).await
    }

    async fn update_guess(&self, round_id: RoundId, guess: &Guess) -> Result<Option<Game>> {
        self.check("update_guess")?;
        self.inner.update_guess(round_id, guess).await
    }

    async fn update_game_final_results(
        &self,
        game_id: GameId,
        results: &FinalResults,
    ) -> Result<Option<Game>> {
        self.check("update_game_final_results")?;
        self.inner.update_game_final_results(game_id, results).await
    }
}

fn flaky_manager() -> (Arc<GameManager>, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::default());
    let game_manager = Arc::new(GameManager::new(
        store.clone(),
        Arc::new(create_test_catalog()),
        Arc::new(AgentSimulator::new(Some(1))),
        GameEventBus::new(),
        ManagerConfig {
            default_settings: test_settings(3),
            ..ManagerConfig::default()
        },
    ));
    (game_manager, store)
}

async fn stored_game(store: &FlakyStore, game_id: GameId) -> Game {
    store.get_game_by_id(game_id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_store_failure_leaves_state_untouched() {
    let (game_manager, store) = flaky_manager();

    let (game, host) = game_manager.create_game("Alice").await.unwrap();
    game_manager.join_game(&game.code, "Bob").await.unwrap();
    store.failing.store(true, Ordering::SeqCst);

    let join = game_manager.join_game(&game.code, "Carol").await;
    assert!(matches!(join, Err(GameError::Internal { .. })));
    assert_eq!(game_manager.get_game(game.id).await.unwrap().players.len(), 2);

    let start = game_manager.start_game(game.id, host).await;
    assert!(matches!(start, Err(GameError::Internal { .. })));
    let current = game_manager.get_game(game.id).await.unwrap();
    assert_eq!(current.status, GameStatus::Waiting);
    assert!(current.rounds.is_empty());

    // Once the store is back the same command goes through
    store.recover();
    let started = game_manager.start_game(game.id, host).await.unwrap();
    assert_eq!(started.status, GameStatus::Playing);
    assert_eq!(started.rounds.len(), 1);
}

#[tokio::test]
async fn test_failed_round_write_keeps_stored_game_waiting() {
    let (game_manager, store) = flaky_manager();
    let (game, host) = game_manager.create_game("Alice").await.unwrap();

    store.fail_only("create_round");
    let start = game_manager.start_game(game.id, host).await;
    assert!(matches!(start, Err(GameError::Internal { .. })));

    let stored = stored_game(&store, game.id).await;
    assert_eq!(stored.status, GameStatus::Waiting);
    assert!(stored.rounds.is_empty());
    assert_eq!(
        game_manager.get_game(game.id).await.unwrap().status,
        GameStatus::Waiting
    );
    assert_eq!(game_manager.pending_round_tasks(), 0);

    store.recover();
    game_manager.start_game(game.id, host).await.unwrap();
    let stored = stored_game(&store, game.id).await;
    assert_eq!(stored.status, GameStatus::Playing);
    assert_eq!(stored.rounds.len(), 1);
}

#[tokio::test]
async fn test_failed_computer_join_rolls_back_store() {
    let (game_manager, store) = flaky_manager();
    let (game, host) = game_manager.create_game("Alice").await.unwrap();

    store.fail_players_after(1);
    let added = game_manager.add_computer_players(game.id, host, 3).await;
    assert!(matches!(added, Err(GameError::Internal { .. })));
    assert_eq!(game_manager.get_game(game.id).await.unwrap().players.len(), 1);
    assert_eq!(stored_game(&store, game.id).await.players.len(), 1);

    store.recover();
    let retried = game_manager.add_computer_players(game.id, host, 3).await.unwrap();
    assert_eq!(retried.players.len(), 4);
    let stored = stored_game(&store, game.id).await;
    assert_eq!(stored.players.len(), 4);
    for player in &retried.players {
        assert!(stored.players.iter().any(|p| p.id == player.id));
    }
}
