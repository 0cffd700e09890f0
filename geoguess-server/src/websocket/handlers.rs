use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::game_manager::GameManager;
use crate::websocket::connection::{ConnectionId, ConnectionManager};
use geoguess_types::{ClientMessage, Game, GameError, GameId, PlayerId, ServerMessage};

#[derive(Clone)]
pub struct MessageHandler {
    connection_id: ConnectionId,
    connection_manager: Arc<ConnectionManager>,
    game_manager: Arc<GameManager>,
}

impl MessageHandler {
    pub fn new(
        connection_id: ConnectionId,
        connection_manager: Arc<ConnectionManager>,
        game_manager: Arc<GameManager>,
    ) -> Self {
        Self {
            connection_id,
            connection_manager,
            game_manager,
        }
    }

    /// Apply one client command. Game rule violations are answered with an
    /// `Error` message; only a closed connection is returned as `Err`.
    pub async fn handle_message(&self, message: ClientMessage) -> Result<(), String> {
        self.connection_manager.update_activity(self.connection_id);

        let outcome = match message {
            ClientMessage::CreateGame { host_name } => self.handle_create_game(host_name).await,
            ClientMessage::JoinGame { code, name } => self.handle_join_game(code, name).await,
            ClientMessage::RejoinGame { game_id, player_id } => {
                self.handle_rejoin_game(game_id, player_id).await
            }
            ClientMessage::AddComputerPlayers { count } => {
                self.with_seat(|game_id, player_id| async move {
                    self.game_manager
                        .add_computer_players(game_id, player_id, count)
                        .await
                        .map(|_| ())
                })
                .await
            }
            ClientMessage::UpdateSettings { settings } => {
                self.with_seat(|game_id, player_id| async move {
                    self.game_manager
                        .update_settings(game_id, player_id, settings)
                        .await
                        .map(|_| ())
                })
                .await
            }
            ClientMessage::StartGame => {
                self.with_seat(|game_id, player_id| async move {
                    self.game_manager
                        .start_game(game_id, player_id)
                        .await
                        .map(|_| ())
                })
                .await
            }
            ClientMessage::SubmitGuess { lat, lng } => {
                self.with_seat(|game_id, player_id| async move {
                    self.game_manager
                        .submit_guess(game_id, player_id, lat, lng)
                        .await
                        .map(|_| ())
                })
                .await
            }
            ClientMessage::NextRound => {
                self.with_seat(|game_id, player_id| async move {
                    self.game_manager
                        .next_round(game_id, player_id)
                        .await
                        .map(|_| ())
                })
                .await
            }
            ClientMessage::LeaveGame => self.handle_leave_game().await,
            // Activity was already refreshed above
            ClientMessage::Heartbeat => Ok(()),
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(err) => {
                info!("Rejected command from {}: {}", self.connection_id, err);
                self.send_message(ServerMessage::rejected(err))
            }
        }
    }

    pub fn handle_disconnect(&self) {
        // The seat stays in the game so the player can rejoin later
        if let Some(connection) = self.connection_manager.remove_connection(self.connection_id) {
            if let Some((game_id, player_id)) = connection.seat() {
                debug!(
                    "Player {} of game {} disconnected ({})",
                    player_id, game_id, self.connection_id
                );
            }
        }
    }

    /// Run a command on behalf of the seat this connection is bound to.
    async fn with_seat<F, Fut>(&self, command: F) -> Result<(), GameError>
    where
        F: FnOnce(GameId, PlayerId) -> Fut,
        Fut: std::future::Future<Output = Result<(), GameError>>,
    {
        let (game_id, player_id) = self
            .connection_manager
            .get_connection(self.connection_id)
            .and_then(|conn| conn.seat())
            .ok_or_else(|| GameError::not_found("Game"))?;
        command(game_id, player_id).await
    }

    async fn handle_create_game(&self, host_name: String) -> Result<(), GameError> {
        let (game, player_id) = self.game_manager.create_game(&host_name).await?;
        self.joined(game, player_id)
    }

    async fn handle_join_game(&self, code: String, name: String) -> Result<(), GameError> {
        let (game, player_id) = self.game_manager.join_game(code.trim(), &name).await?;
        self.joined(game, player_id)
    }

    async fn handle_rejoin_game(&self, game_id: GameId, player_id: PlayerId) -> Result<(), GameError> {
        let game = self.game_manager.rejoin_game(game_id, player_id).await?;
        self.joined(game, player_id)
    }

    fn joined(&self, game: Game, player_id: PlayerId) -> Result<(), GameError> {
        self.connection_manager
            .bind_player(self.connection_id, game.id, player_id);
        let game = game.personalized_for_player(player_id);
        self.send_message(ServerMessage::GameJoined { game, player_id })
            .map_err(|reason| GameError::Internal { message: reason })
    }

    async fn handle_leave_game(&self) -> Result<(), GameError> {
        self.with_seat(|game_id, player_id| async move {
            self.game_manager.leave_game(game_id, player_id).await?;
            Ok(())
        })
        .await?;

        self.connection_manager.clear_player(self.connection_id);
        self.send_message(ServerMessage::GameLeft)
            .map_err(|reason| GameError::Internal { message: reason })
    }

    /// Report a malformed frame that never became a command.
    pub fn send_error(&self, message: String) -> Result<(), String> {
        self.send_message(ServerMessage::Error {
            message,
            error: None,
        })
    }

    fn send_message(&self, message: ServerMessage) -> Result<(), String> {
        self.connection_manager
            .send_to_connection(self.connection_id, message)
            .inspect_err(|err| warn!("Failed to send to {}: {}", self.connection_id, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_manager::ManagerConfig;
    use geoguess_core::{AgentSimulator, CityCatalog, GameEventBus, GameEventHandler};
    use geoguess_persistence::MemoryGameStore;
    use geoguess_types::GameStatus;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup() -> (Arc<ConnectionManager>, Arc<GameManager>) {
        let connection_manager = Arc::new(ConnectionManager::new());
        let mut event_bus = GameEventBus::new();
        event_bus.add_handler(connection_manager.clone() as Arc<dyn GameEventHandler>);

        let game_manager = Arc::new(GameManager::new(
            Arc::new(MemoryGameStore::new()),
            Arc::new(CityCatalog::builtin()),
            Arc::new(AgentSimulator::new(Some(7))),
            event_bus,
            ManagerConfig::default(),
        ));
        (connection_manager, game_manager)
    }

    fn client(
        connection_manager: &Arc<ConnectionManager>,
        game_manager: &Arc<GameManager>,
    ) -> (MessageHandler, UnboundedReceiver<ServerMessage>) {
        let id = ConnectionId::new();
        let receiver = connection_manager.create_connection(id);
        let handler = MessageHandler::new(id, connection_manager.clone(), game_manager.clone());
        (handler, receiver)
    }

    fn expect_joined(receiver: &mut UnboundedReceiver<ServerMessage>) -> (Game, PlayerId) {
        loop {
            match receiver.try_recv() {
                Ok(ServerMessage::GameJoined { game, player_id }) => return (game, player_id),
                Ok(_) => continue,
                Err(err) => panic!("No GameJoined message: {:?}", err),
            }
        }
    }

    #[tokio::test]
    async fn test_create_and_join_over_messages() {
        let (connections, games) = setup();
        let (host, mut host_rx) = client(&connections, &games);
        let (guest, mut guest_rx) = client(&connections, &games);

        host.handle_message(ClientMessage::CreateGame {
            host_name: "Alice".to_string(),
        })
        .await
        .unwrap();
        let (game, host_id) = expect_joined(&mut host_rx);
        assert_eq!(game.host_id, host_id);

        guest
            .handle_message(ClientMessage::JoinGame {
                code: game.code.clone(),
                name: "Bob".to_string(),
            })
            .await
            .unwrap();
        let (joined, _) = expect_joined(&mut guest_rx);
        assert_eq!(joined.players.len(), 2);

        // The host hears about the new player
        match host_rx.try_recv() {
            Ok(ServerMessage::GameStateUpdate { game }) => assert_eq!(game.players.len(), 2),
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_commands_without_a_game_are_rejected() {
        let (connections, games) = setup();
        let (handler, mut rx) = client(&connections, &games);

        handler.handle_message(ClientMessage::StartGame).await.unwrap();
        match rx.try_recv() {
            Ok(ServerMessage::Error { error, .. }) => {
                assert_eq!(error, Some(GameError::not_found("Game")));
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_guest_cannot_start_game() {
        let (connections, games) = setup();
        let (host, mut host_rx) = client(&connections, &games);
        let (guest, mut guest_rx) = client(&connections, &games);

        host.handle_message(ClientMessage::CreateGame {
            host_name: "Alice".to_string(),
        })
        .await
        .unwrap();
        let (game, _) = expect_joined(&mut host_rx);
        guest
            .handle_message(ClientMessage::JoinGame {
                code: game.code.clone(),
                name: "Bob".to_string(),
            })
            .await
            .unwrap();
        expect_joined(&mut guest_rx);

        guest.handle_message(ClientMessage::StartGame).await.unwrap();
        match guest_rx.try_recv() {
            Ok(ServerMessage::Error { error, .. }) => assert_eq!(error, Some(GameError::NotHost)),
            other => panic!("Unexpected message: {:?}", other),
        }
        assert_eq!(
            games.get_game(game.id).await.unwrap().status,
            GameStatus::Waiting
        );
    }

    #[tokio::test]
    async fn test_leave_game_unbinds_connection() {
        let (connections, games) = setup();
        let (host, mut host_rx) = client(&connections, &games);
        let (guest, mut guest_rx) = client(&connections, &games);

        host.handle_message(ClientMessage::CreateGame {
            host_name: "Alice".to_string(),
        })
        .await
        .unwrap();
        let (game, _) = expect_joined(&mut host_rx);
        guest
            .handle_message(ClientMessage::JoinGame {
                code: game.code.clone(),
                name: "Bob".to_string(),
            })
            .await
            .unwrap();
        expect_joined(&mut guest_rx);

        guest.handle_message(ClientMessage::LeaveGame).await.unwrap();
        let left = std::iter::from_fn(|| guest_rx.try_recv().ok())
            .any(|msg| matches!(msg, ServerMessage::GameLeft));
        assert!(left);
        assert_eq!(connections.game_connection_count(game.id), 1);

        // The host keeps the lobby
        host.handle_message(ClientMessage::LeaveGame).await.unwrap();
        let rejected = std::iter::from_fn(|| host_rx.try_recv().ok())
            .any(|msg| matches!(msg, ServerMessage::Error { .. }));
        assert!(rejected);
    }

    #[tokio::test]
    async fn test_disconnect_keeps_seat_for_rejoin() {
        let (connections, games) = setup();
        let (host, mut host_rx) = client(&connections, &games);

        host.handle_message(ClientMessage::CreateGame {
            host_name: "Alice".to_string(),
        })
        .await
        .unwrap();
        let (game, host_id) = expect_joined(&mut host_rx);

        host.handle_disconnect();
        assert_eq!(connections.connection_count(), 0);

        let (again, mut again_rx) = client(&connections, &games);
        again
            .handle_message(ClientMessage::RejoinGame {
                game_id: game.id,
                player_id: host_id,
            })
            .await
            .unwrap();
        let (rejoined, player_id) = expect_joined(&mut again_rx);
        assert_eq!(rejoined.id, game.id);
        assert_eq!(player_id, host_id);
    }
}
