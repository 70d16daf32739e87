//! Broadcast gateway and connection bookkeeping.
//!
//! The coordinator never talks to sockets. It returns `Outbound` values whose
//! recipients were resolved against room membership at the moment the event
//! happened; the `ConnectionManager` serializes each message once and queues
//! the text on every recipient's outbound channel.
//!
//! Three fan-out shapes exist:
//! - a single connection (join acknowledgement, validation errors)
//! - one team of a room (round start, round result)
//! - the whole room (`room:update`, chat, match end)

use crate::room::Room;
use log::{debug, info, warn};
use shared::{ConnectionId, ServerMessage, Team};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;

/// A message addressed to a fixed set of connections.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub recipients: Vec<ConnectionId>,
    pub message: ServerMessage,
}

impl Outbound {
    pub fn to_connection(id: ConnectionId, message: ServerMessage) -> Self {
        Self {
            recipients: vec![id],
            message,
        }
    }

    pub fn to_room(room: &Room, message: ServerMessage) -> Self {
        Self {
            recipients: room.member_ids(),
            message,
        }
    }

    pub fn to_team(room: &Room, team: Team, message: ServerMessage) -> Self {
        Self {
            recipients: room.team_members(team),
            message,
        }
    }

    /// `room:update` with the redacted projection, to every member.
    pub fn room_update(room: &Room) -> Self {
        Self::to_room(room, ServerMessage::RoomUpdate(Box::new(room.public())))
    }

    pub fn error(id: ConnectionId, error: impl ToString) -> Self {
        Self::to_connection(
            id,
            ServerMessage::Error {
                message: error.to_string(),
            },
        )
    }
}

/// One live transport connection.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub connected_at: Instant,
    sender: mpsc::UnboundedSender<String>,
}

/// Live connections and their outbound queues.
pub struct ConnectionManager {
    connections: HashMap<ConnectionId, Connection>,
    next_id: u32,
    max_connections: usize,
}

impl ConnectionManager {
    /// Connection ids start at 1 and are never reused.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            next_id: 1,
            max_connections,
        }
    }

    /// Registers a connection, or returns `None` when at capacity.
    pub fn add_connection(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<String>,
    ) -> Option<ConnectionId> {
        if self.connections.len() >= self.max_connections {
            warn!("Rejecting {}: {} connections open", addr, self.connections.len());
            return None;
        }

        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        info!("Connection {} opened from {}", id, addr);
        self.connections.insert(
            id,
            Connection {
                id,
                addr,
                connected_at: Instant::now(),
                sender,
            },
        );
        Some(id)
    }

    pub fn remove_connection(&mut self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some(conn) => {
                info!(
                    "Connection {} from {} closed after {:?}",
                    id,
                    conn.addr,
                    conn.connected_at.elapsed()
                );
                true
            }
            None => false,
        }
    }

    /// Serializes `outbound.message` once and queues it for each recipient.
    /// Returns how many recipients it was queued for.
    pub fn deliver(&self, outbound: &Outbound) -> usize {
        if outbound.recipients.is_empty() {
            return 0;
        }

        let text = match serde_json::to_string(&outbound.message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize {}: {}", outbound.message.event_name(), e);
                return 0;
            }
        };

        let mut delivered = 0;
        for id in &outbound.recipients {
            match self.connections.get(id) {
                Some(conn) if conn.sender.send(text.clone()).is_ok() => delivered += 1,
                Some(_) => warn!("Outbound queue for {} is closed", id),
                None => debug!("Skipping {} for unknown connection {}", outbound.message.event_name(), id),
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
