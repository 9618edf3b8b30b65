//! Connection Registry
//!
//! Tracks the open data channel of every networked player. A record exists
//! exactly while its channel is open: transports add it on open and remove
//! it on close or error, before any other event is processed.

use std::collections::BTreeMap;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::game::player::PlayerId;

/// Transport-assigned id of a single connection.
///
/// Distinguishes a stale close event from the connection that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

/// Outbound half of a player's data channel.
#[derive(Debug)]
pub struct Connection {
    /// Connection id.
    pub id: ConnectionId,
    /// Text frames queued for the socket writer.
    pub sender: mpsc::UnboundedSender<String>,
    /// When the channel opened.
    pub opened_at: Instant,
}

/// Open connections keyed by player.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<PlayerId, Connection>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly opened channel.
    ///
    /// A second connection claiming the same player replaces the first; the
    /// old sender is returned so the caller can let it drop.
    pub fn add(
        &mut self,
        player_id: PlayerId,
        id: ConnectionId,
        sender: mpsc::UnboundedSender<String>,
    ) -> Option<Connection> {
        let previous = self.connections.insert(player_id, Connection {
            id,
            sender,
            opened_at: Instant::now(),
        });
        if let Some(old) = &previous {
            warn!(player_id, old = old.id.0, new = id.0, "Player reconnected, replacing channel");
        }
        previous
    }

    /// Drop the record for `player_id`.
    pub fn remove(&mut self, player_id: PlayerId) -> Option<Connection> {
        self.connections.remove(&player_id)
    }

    /// Drop the record only if it still belongs to connection `id`.
    pub fn remove_connection(&mut self, player_id: PlayerId, id: ConnectionId) -> bool {
        match self.connections.get(&player_id) {
            Some(conn) if conn.id == id => {
                debug!(player_id, conn = id.0, open_for = ?conn.opened_at.elapsed(), "Channel closed");
                self.connections.remove(&player_id);
                true
            }
            _ => false,
        }
    }

    /// Whether the player currently has an open channel.
    pub fn is_online(&self, player_id: PlayerId) -> bool {
        self.connections.contains_key(&player_id)
    }

    /// Send `text` to every open channel, best-effort.
    ///
    /// Returns the number of channels the message was queued on.
    pub fn broadcast(&self, text: &str) -> usize {
        let mut delivered = 0;
        for (player_id, conn) in &self.connections {
            if conn.sender.send(text.to_string()).is_ok() {
                delivered += 1;
            } else {
                warn!(player_id, "Broadcast to closed channel");
            }
        }
        debug!(delivered, total = self.connections.len(), "Broadcast");
        delivered
    }

    /// Send `text` to a single player.
    pub fn send_to(&self, player_id: PlayerId, text: &str) -> bool {
        match self.connections.get(&player_id) {
            Some(conn) => conn.sender.send(text.to_string()).is_ok(),
            None => false,
        }
    }

    /// Number of open channels.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no channel is open.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
