use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{FinalResults, Game, GameError, GameId, GameRound, GameSettings, PlayerId};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum ClientMessage {
    CreateGame { host_name: String },
    JoinGame { code: String, name: String },
    RejoinGame { game_id: GameId, player_id: PlayerId },
    AddComputerPlayers { count: u32 },
    UpdateSettings { settings: GameSettings },
    StartGame,
    SubmitGuess { lat: f64, lng: f64 },
    NextRound,
    LeaveGame,
    Heartbeat,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum ServerMessage {
    GameJoined { game: Game, player_id: PlayerId },
    GameStateUpdate { game: Game },
    RoundStarted { game: Game, round: GameRound },
    RoundResults { game: Game, round: GameRound },
    GameFinished { game: Game, final_results: FinalResults },
    GameLeft,
    Error { message: String, error: Option<GameError> },
}

impl ServerMessage {
    pub fn rejected(error: GameError) -> Self {
        ServerMessage::Error {
            message: error.to_string(),
            error: Some(error),
        }
    }
}
