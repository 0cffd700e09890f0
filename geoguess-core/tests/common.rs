#![allow(dead_code)]

use geoguess_core::{CityCatalog, GameEvent, GameEventHandler, GameSession, ROUND_GRACE_PERIOD_MS};
use geoguess_types::{CityDifficulty, GameSettings, Player, PlayerId};
use std::sync::{Arc, Mutex};

/// Small catalog with known coordinates
pub fn create_test_catalog() -> CityCatalog {
    let csv = "Paris,France,48.8566,2.3522,easy\n\
               London,United Kingdom,51.5074,-0.1278,easy\n\
               Tokyo,Japan,35.6762,139.6503,easy\n\
               Sydney,Australia,-33.8688,151.2093,easy\n\
               Nuuk,Greenland,64.1814,-51.6941,hard";
    CityCatalog::from_csv(csv).unwrap()
}

pub fn create_test_settings(total_rounds: u32) -> GameSettings {
    GameSettings {
        max_players: 6,
        round_time_limit_ms: 30_000,
        total_rounds,
        city_difficulty: CityDifficulty::Easy,
    }
}

/// Lobby hosted by "Alice" with the other names already joined
pub fn create_lobby(total_rounds: u32, others: &[&str]) -> (GameSession, Vec<Player>) {
    let mut session = GameSession::create(
        "424242".to_string(),
        "Alice",
        create_test_settings(total_rounds),
        0,
    )
    .unwrap();

    let mut players = vec![session.game.players[0].clone()];
    for name in others {
        players.push(session.add_player(name).unwrap());
    }
    (session, players)
}

/// Guess `offset_degrees` of latitude away from the current target
pub fn guess_near_target(session: &mut GameSession, player_id: PlayerId, offset_degrees: f64, now: i64) {
    let city = session.game.rounds.last().unwrap().city.clone();
    let lat = (city.lat + offset_degrees).clamp(-90.0, 90.0);
    session
        .submit_guess(player_id, lat, city.lng, now, ROUND_GRACE_PERIOD_MS)
        .unwrap();
}

pub fn get_player_by_name<'a>(players: &'a [Player], name: &str) -> Option<&'a Player> {
    players.iter().find(|p| p.name == name)
}

/// Event collector for testing event emissions
#[derive(Clone, Default)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<GameEvent>>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_events(&self) -> Vec<GameEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn has_event_type(&self, check_fn: impl Fn(&GameEvent) -> bool) -> bool {
        self.events.lock().unwrap().iter().any(check_fn)
    }
}

impl GameEventHandler for EventCollector {
    fn handle_event(&self, event: &GameEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
