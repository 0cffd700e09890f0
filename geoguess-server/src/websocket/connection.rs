use dashmap::DashMap;
use geoguess_core::{GameEvent, GameEventHandler};
use geoguess_types::{GameId, PlayerId, ServerMessage};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub game_id: Option<GameId>,
    pub player_id: Option<PlayerId>,
    pub connected_at: Instant,
    pub last_activity: Instant,
    pub sender: mpsc::UnboundedSender<ServerMessage>,
}

impl Connection {
    pub fn new(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let now = Instant::now();

        let connection = Self {
            id,
            game_id: None,
            player_id: None,
            connected_at: now,
            last_activity: now,
            sender,
        };

        (connection, receiver)
    }

    pub fn update_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// The game and seat this connection plays, once it has joined one.
    pub fn seat(&self) -> Option<(GameId, PlayerId)> {
        self.game_id.zip(self.player_id)
    }

    pub fn send_message(&self, message: ServerMessage) -> Result<(), String> {
        self.sender
            .send(message)
            .map_err(|_| "Connection closed".to_string())
    }

    pub fn is_inactive(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }
}

/// Every open socket, and the game seat it is bound to.
///
/// Sends go through unbounded channels, so delivering an event never blocks
/// the game that published it.
#[derive(Default)]
pub struct ConnectionManager {
    connections: DashMap<ConnectionId, Connection>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_connection(&self, id: ConnectionId) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (conn, receiver) = Connection::new(id);
        self.connections.insert(id, conn);
        receiver
    }

    pub fn remove_connection(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id).map(|(_, conn)| conn)
    }

    pub fn get_connection(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.get(&id).map(|conn| conn.clone())
    }

    pub fn update_activity(&self, id: ConnectionId) {
        if let Some(mut connection) = self.connections.get_mut(&id) {
            connection.update_activity();
        }
    }

    pub fn bind_player(&self, id: ConnectionId, game_id: GameId, player_id: PlayerId) {
        if let Some(mut connection) = self.connections.get_mut(&id) {
            connection.game_id = Some(game_id);
            connection.player_id = Some(player_id);
        }
    }

    pub fn clear_player(&self, id: ConnectionId) {
        if let Some(mut connection) = self.connections.get_mut(&id) {
            connection.game_id = None;
            connection.player_id = None;
        }
    }

    pub fn send_to_connection(&self, id: ConnectionId, message: ServerMessage) -> Result<(), String> {
        match self.connections.get(&id) {
            Some(connection) => connection.send_message(message),
            None => Err("Connection not found".to_string()),
        }
    }

    /// Send each player bound to `game_id` the message built for their seat.
    pub fn send_to_game<F>(&self, game_id: GameId, build: F) -> usize
    where
        F: Fn(PlayerId) -> ServerMessage,
    {
        let mut delivered = 0;
        for connection in self.connections.iter() {
            let Some((conn_game_id, player_id)) = connection.seat() else {
                continue;
            };
            if conn_game_id != game_id {
                continue;
            }
            if connection.send_message(build(player_id)).is_ok() {
                delivered += 1;
            } else {
                debug!("Dropped message for closed connection {}", connection.id);
            }
        }
        delivered
    }

    pub fn cleanup_inactive_connections(&self, timeout: Duration) -> usize {
        let inactive: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|conn| conn.is_inactive(timeout))
            .map(|conn| conn.id)
            .collect();

        for connection_id in &inactive {
            info!("Removing inactive connection: {}", connection_id);
            self.connections.remove(connection_id);
        }
        inactive.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn game_connection_count(&self, game_id: GameId) -> usize {
        self.connections
            .iter()
            .filter(|conn| conn.game_id == Some(game_id))
            .count()
    }
}

impl GameEventHandler for ConnectionManager {
    fn handle_event(&self, event: &GameEvent) {
        let game_id = event.game_id();
        let delivered = match event {
            GameEvent::GameUpdated { game } => self.send_to_game(game_id, |player_id| {
                ServerMessage::GameStateUpdate {
                    game: game.personalized_for_player(player_id),
                }
            }),
            GameEvent::RoundStarted { game, round } => self.send_to_game(game_id, |player_id| {
                ServerMessage::RoundStarted {
                    game: game.personalized_for_player(player_id),
                    round: round.personalized_for_player(player_id),
                }
            }),
            GameEvent::RoundResults { game, round } => self.send_to_game(game_id, |player_id| {
                ServerMessage::RoundResults {
                    game: game.personalized_for_player(player_id),
                    round: round.clone(),
                }
            }),
            GameEvent::GameFinished {
                game,
                final_results,
            } => self.send_to_game(game_id, |player_id| ServerMessage::GameFinished {
                game: game.personalized_for_player(player_id),
                final_results: final_results.clone(),
            }),
        };
        debug!("Delivered game {} event to {} connections", game_id, delivered);
    }
}
