use crate::GameSession;
use geoguess_types::GameStatus;
use std::time::Duration;

/// Why a game was dropped from memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Finished,
    Inactive,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::Finished => "finished",
            EvictionReason::Inactive => "inactivity timeout",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GameCleanup {
    pub abandoned_threshold: Duration, // no activity at all
    pub finished_retention: Duration,  // how long finished games stay readable
}

impl Default for GameCleanup {
    fn default() -> Self {
        Self {
            abandoned_threshold: Duration::from_secs(7200), // 2 hours
            finished_retention: Duration::from_secs(600),   // 10 minutes
        }
    }
}

impl GameCleanup {
    pub fn new(abandoned_threshold: Duration, finished_retention: Duration) -> Self {
        Self {
            abandoned_threshold,
            finished_retention,
        }
    }

    /// Decide whether a session should be evicted. The store keeps the record
    /// either way; eviction only frees the in-memory session.
    pub fn should_evict(&self, session: &GameSession) -> Option<EvictionReason> {
        if session.game.status == GameStatus::Finished
            && session.is_idle(self.finished_retention)
        {
            return Some(EvictionReason::Finished);
        }

        if session.is_idle(self.abandoned_threshold) {
            return Some(EvictionReason::Inactive);
        }

        None
    }
}
