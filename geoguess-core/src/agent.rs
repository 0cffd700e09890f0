//! Simulated players.
//!
//! [`AgentSimulator`] produces a guess location for a computer player and the
//! delay it "thinks" before submitting. Output is random but always clamped to
//! valid coordinates.

use std::f64::consts::TAU;
use std::sync::Mutex;
use std::time::Duration;

use geoguess_types::{City, CityDifficulty};
use rand::prelude::*;

/// Largest random spread, in degrees, for an agent with zero effective accuracy.
pub const MAX_SPREAD_DEGREES: f64 = 20.0;
/// Bounds of the miss added to every simulated guess, so even a perfect agent
/// lands 2 to 10 degrees off target.
pub const MIN_OFFSET_DEGREES: f64 = 2.0;
pub const MAX_MIN_OFFSET_DEGREES: f64 = 10.0;

pub const THINK_TIME_MIN_MS: u64 = 2000;
pub const THINK_TIME_MAX_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuessLocation {
    pub lat: f64,
    pub lng: f64,
}

pub struct AgentSimulator {
    rng: Mutex<StdRng>,
}

impl AgentSimulator {
    /// `Some(seed)` makes the sequence reproducible, `None` seeds from entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Well-known cities are easier to place than obscure ones.
    pub fn difficulty_multiplier(difficulty: CityDifficulty) -> f64 {
        match difficulty {
            CityDifficulty::Easy => 1.0,
            CityDifficulty::Medium => 0.75,
            CityDifficulty::Hard => 0.5,
        }
    }

    pub fn effective_accuracy(accuracy: f64, difficulty: CityDifficulty) -> f64 {
        (accuracy.clamp(0.0, 1.0) * Self::difficulty_multiplier(difficulty)).clamp(0.0, 1.0)
    }

    pub fn simulate_guess(&self, target: &City, accuracy: f64) -> GuessLocation {
        let effective = Self::effective_accuracy(accuracy, target.difficulty);
        let max_spread = (1.0 - effective) * MAX_SPREAD_DEGREES;

        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let spread = rng.r#gen::<f64>() * max_spread;
        let minimum = rng.gen_range(MIN_OFFSET_DEGREES..=MAX_MIN_OFFSET_DEGREES);
        let angle = rng.gen_range(0.0..TAU);
        let magnitude = spread + minimum;

        GuessLocation {
            lat: (target.lat + magnitude * angle.sin()).clamp(-90.0, 90.0),
            lng: (target.lng + magnitude * angle.cos()).clamp(-180.0, 180.0),
        }
    }

    pub fn think_time_ms(&self) -> u64 {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.gen_range(THINK_TIME_MIN_MS..=THINK_TIME_MAX_MS)
    }

    pub fn think_time(&self) -> Duration {
        Duration::from_millis(self.think_time_ms())
    }

    /// Accuracy handed to a newly added computer player.
    pub fn sample_accuracy(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.gen_range(0.3..0.9)
    }
}

impl Default for AgentSimulator {
    fn default() -> Self {
        Self::new(None)
    }
}
