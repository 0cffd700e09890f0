use std::sync::Arc;

use geoguess_types::{FinalResults, Game, GameId, GameRound};

/// Notifications pushed to connected clients. Every event carries a full
/// snapshot so receivers never patch state themselves.
#[derive(Debug, Clone)]
pub enum GameEvent {
    GameUpdated {
        game: Game,
    },
    RoundStarted {
        game: Game,
        round: GameRound,
    },
    RoundResults {
        game: Game,
        round: GameRound,
    },
    GameFinished {
        game: Game,
        final_results: FinalResults,
    },
}

impl GameEvent {
    pub fn game_id(&self) -> GameId {
        match self {
            GameEvent::GameUpdated { game } => game.id,
            GameEvent::RoundStarted { game, .. } => game.id,
            GameEvent::RoundResults { game, .. } => game.id,
            GameEvent::GameFinished { game, .. } => game.id,
        }
    }

    pub fn game(&self) -> &Game {
        match self {
            GameEvent::GameUpdated { game } => game,
            GameEvent::RoundStarted { game, .. } => game,
            GameEvent::RoundResults { game, .. } => game,
            GameEvent::GameFinished { game, .. } => game,
        }
    }
}

/// Event handler trait for processing game events
pub trait GameEventHandler: Send + Sync {
    fn handle_event(&self, event: &GameEvent);
}

/// Fans events out to every registered handler.
#[derive(Clone, Default)]
pub struct GameEventBus {
    handlers: Vec<Arc<dyn GameEventHandler>>,
}

impl GameEventBus {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn add_handler(&mut self, handler: Arc<dyn GameEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn publish(&self, event: GameEvent) {
        for handler in &self.handlers {
            handler.handle_event(&event);
        }
    }
}
