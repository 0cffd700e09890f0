use std::env;
use std::str::FromStr;
use std::time::Duration;

use geoguess_core::{GameCleanup, ROUND_GRACE_PERIOD_MS, validate_settings};
use geoguess_persistence::DEFAULT_DATABASE_URL;
use geoguess_types::{CityDifficulty, GameError, GameSettings};

use crate::game_manager::ManagerConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub cities_file: Option<String>,
    pub round_grace_period_ms: i64,
    pub default_max_players: u32,
    pub default_round_time_limit_ms: u64,
    pub default_total_rounds: u32,
    pub default_city_difficulty: CityDifficulty,
    pub game_timeout_minutes: u64,
    pub finished_game_retention_minutes: u64,
    pub connection_timeout_seconds: u64,
}

/// Read `key`, falling back to `default` when unset or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid {} value {:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("PORT", 8080),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            cities_file: env::var("CITIES_FILE").ok().filter(|p| !p.trim().is_empty()),
            round_grace_period_ms: env_or("ROUND_GRACE_PERIOD_MS", ROUND_GRACE_PERIOD_MS),
            default_max_players: env_or("DEFAULT_MAX_PLAYERS", 8),
            default_round_time_limit_ms: env_or("DEFAULT_ROUND_TIME_LIMIT_MS", 30_000),
            default_total_rounds: env_or("DEFAULT_TOTAL_ROUNDS", 5),
            default_city_difficulty: env::var("DEFAULT_CITY_DIFFICULTY")
                .ok()
                .and_then(|raw| CityDifficulty::parse(&raw))
                .unwrap_or(CityDifficulty::Medium),
            game_timeout_minutes: env_or("GAME_TIMEOUT_MINUTES", 120),
            finished_game_retention_minutes: env_or("FINISHED_GAME_RETENTION_MINUTES", 10),
            connection_timeout_seconds: env_or("CONNECTION_TIMEOUT_SECONDS", 300),
        }
    }

    pub fn default_settings(&self) -> GameSettings {
        GameSettings {
            max_players: self.default_max_players,
            round_time_limit_ms: self.default_round_time_limit_ms,
            total_rounds: self.default_total_rounds,
            city_difficulty: self.default_city_difficulty,
        }
    }

    /// Reject values no game could be created with.
    pub fn validate(&self) -> Result<(), GameError> {
        if self.round_grace_period_ms < 0 {
            return Err(GameError::InvalidSettings {
                reason: "ROUND_GRACE_PERIOD_MS must not be negative".to_string(),
            });
        }
        validate_settings(&self.default_settings(), 1)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            default_settings: self.default_settings(),
            grace_period_ms: self.round_grace_period_ms,
            cleanup: GameCleanup::new(
                Duration::from_secs(self.game_timeout_minutes * 60),
                Duration::from_secs(self.finished_game_retention_minutes * 60),
            ),
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
