use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, thiserror::Error)]
#[ts(export)]
pub enum GameError {
    #[error("{what} not found")]
    NotFound { what: String },
    #[error("Operation not valid while game is {current_state}")]
    InvalidState { current_state: String },
    #[error("Only the host can do that")]
    NotHost,
    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },
    #[error("Player already guessed this round")]
    DuplicateGuess,
    #[error("Round is closed")]
    RoundClosed,
    #[error("Invalid settings: {reason}")]
    InvalidSettings { reason: String },
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GameError {
    pub fn not_found(what: impl Into<String>) -> Self {
        GameError::NotFound { what: what.into() }
    }

    pub fn invalid_state(current_state: impl Into<String>) -> Self {
        GameError::InvalidState {
            current_state: current_state.into(),
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        GameError::Forbidden {
            reason: reason.into(),
        }
    }
}
