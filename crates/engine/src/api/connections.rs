//! Connection management for WebSocket clients.
//!
//! Tracks connected clients and the broadcast group (room) each one is in.
//! Every authenticated connection starts in the shared lobby; match formation
//! moves both players into their battle's room.

use std::collections::HashMap;

use arena_domain::{BattleId, ConnectionId, UserId};
use arena_shared::ServerMessage;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Broadcast group a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Lobby,
    Battle(BattleId),
}

/// Information about a connected client.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub room: Room,
}

struct ConnectionEntry {
    info: ConnectionInfo,
    sender: mpsc::Sender<ServerMessage>,
    close: CancellationToken,
}

/// Manages all active WebSocket connections.
pub struct ConnectionManager {
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection in the lobby.
    ///
    /// `close` is cancelled when the server wants the socket shut down.
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        sender: mpsc::Sender<ServerMessage>,
        close: CancellationToken,
    ) {
        let info = ConnectionInfo {
            connection_id,
            user_id,
            room: Room::Lobby,
        };
        let mut connections = self.connections.write().await;
        connections.insert(
            connection_id,
            ConnectionEntry {
                info,
                sender,
                close,
            },
        );
        tracing::debug!(connection_id = %connection_id, user_id = %user_id, "Connection registered");
    }

    pub async fn unregister(&self, connection_id: ConnectionId) {
        let mut connections = self.connections.write().await;
        if connections.remove(&connection_id).is_some() {
            tracing::debug!(connection_id = %connection_id, "Connection unregistered");
        }
    }

    pub async fn get(&self, connection_id: ConnectionId) -> Option<ConnectionInfo> {
        let connections = self.connections.read().await;
        connections.get(&connection_id).map(|entry| entry.info.clone())
    }

    /// Send to one connection. Returns false if it is gone or its buffer is full.
    pub async fn send_to(&self, connection_id: ConnectionId, message: ServerMessage) -> bool {
        let connections = self.connections.read().await;
        let Some(entry) = connections.get(&connection_id) else {
            return false;
        };
        match entry.sender.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "Failed to send message"
                );
                false
            }
        }
    }

    /// Broadcast to every connection in a battle's room.
    pub async fn broadcast_to_battle(&self, battle_id: BattleId, message: ServerMessage) {
        self.broadcast_to_room(Room::Battle(battle_id), message)
            .await;
    }

    pub async fn broadcast_to_room(&self, room: Room, message: ServerMessage) {
        let connections = self.connections.read().await;
        for entry in connections.values() {
            if entry.info.room == room {
                if let Err(e) = entry.sender.try_send(message.clone()) {
                    tracing::warn!(
                        connection_id = %entry.info.connection_id,
                        error = %e,
                        "Failed to broadcast message"
                    );
                }
            }
        }
    }

    /// Move one connection out of its current room into a battle room.
    pub async fn move_to_battle(&self, connection_id: ConnectionId, battle_id: BattleId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get_mut(&connection_id) {
            Some(entry) => {
                entry.info.room = Room::Battle(battle_id);
                tracing::debug!(
                    connection_id = %connection_id,
                    battle_id = %battle_id,
                    "Connection joined battle room"
                );
                true
            }
            None => false,
        }
    }

    /// Send every member of a battle room back to the lobby. Returns how many moved.
    pub async fn return_battle_to_lobby(&self, battle_id: BattleId) -> usize {
        let mut connections = self.connections.write().await;
        let mut moved = 0;
        for entry in connections.values_mut() {
            if entry.info.room == Room::Battle(battle_id) {
                entry.info.room = Room::Lobby;
                moved += 1;
            }
        }
        if moved > 0 {
            tracing::debug!(battle_id = %battle_id, moved, "Battle room returned to lobby");
        }
        moved
    }

    /// Ask a connection's socket task to shut down.
    pub async fn close(&self, connection_id: ConnectionId) -> bool {
        let connections = self.connections.read().await;
        match connections.get(&connection_id) {
            Some(entry) => {
                entry.close.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn room_members(&self, room: Room) -> Vec<ConnectionInfo> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|entry| entry.info.room == room)
            .map(|entry| entry.info.clone())
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
