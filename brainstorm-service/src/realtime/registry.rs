//! Connection routing table and room membership.
//!
//! Process-local: a restart starts empty and a second instance would not see
//! this one's sockets. Delivery is best effort: each connection has a
//! bounded outbound queue and a full queue drops the frame.

use dashmap::DashMap;
use std::collections::HashSet;
use tokio::sync::mpsc;

use super::events::{PresenceStatus, ServerEvent};
use super::presence::PresenceTracker;
use super::RoomBroadcaster;

pub type ConnectionId = String;

struct Connection {
    user_id: String,
    tx: mpsc::Sender<String>,
    rooms: HashSet<String>,
}

pub struct Gateway {
    connections: DashMap<ConnectionId, Connection>,
    users: DashMap<String, HashSet<ConnectionId>>,
    rooms: DashMap<String, HashSet<ConnectionId>>,
    presence: PresenceTracker,
    send_queue: usize,
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::error!(event = event.name(), "Failed to encode socket frame: {}", e);
            None
        }
    }
}

fn deliver(connection_id: &str, tx: &mpsc::Sender<String>, frame: String) -> bool {
    match tx.try_send(frame) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(frame)) => {
            tracing::warn!(
                connection_id = %connection_id,
                frame_len = frame.len(),
                "Send queue full, dropping frame"
            );
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

impl Gateway {
    pub fn new(send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            users: DashMap::new(),
            rooms: DashMap::new(),
            presence: PresenceTracker::new(),
            send_queue: send_queue.max(1),
        }
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Register a socket for `user_id` and hand back its outbound queue.
    pub fn register(&self, user_id: &str) -> (ConnectionId, mpsc::Receiver<String>) {
        let connection_id = format!("conn_{}", uuid::Uuid::new_v4());
        let (tx, rx) = mpsc::channel(self.send_queue);

        self.connections.insert(
            connection_id.clone(),
            Connection {
                user_id: user_id.to_string(),
                tx,
                rooms: HashSet::new(),
            },
        );
        self.users
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id.clone());

        if self.presence.connect(user_id) {
            tracing::debug!(user_id = %user_id, "User came online");
        }
        (connection_id, rx)
    }

    pub fn user_of(&self, connection_id: &str) -> Option<String> {
        self.connections
            .get(connection_id)
            .map(|c| c.user_id.clone())
    }

    pub fn rooms_of(&self, connection_id: &str) -> Vec<String> {
        self.connections
            .get(connection_id)
            .map(|c| c.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Rooms joined by any of `user_id`'s sockets.
    pub fn rooms_of_user(&self, user_id: &str) -> Vec<String> {
        let connections: Vec<ConnectionId> = self
            .users
            .get(user_id)
            .map(|conns| conns.iter().cloned().collect())
            .unwrap_or_default();

        let mut rooms: Vec<String> = connections
            .iter()
            .flat_map(|id| self.rooms_of(id))
            .collect();
        rooms.sort();
        rooms.dedup();
        rooms
    }

    pub fn is_member(&self, connection_id: &str, room: &str) -> bool {
        self.connections
            .get(connection_id)
            .map(|c| c.rooms.contains(room))
            .unwrap_or(false)
    }

    /// True when the connection was not already in the room.
    pub fn join(&self, connection_id: &str, room: &str) -> bool {
        let added = match self.connections.get_mut(connection_id) {
            Some(mut connection) => connection.rooms.insert(room.to_string()),
            None => return false,
        };
        if added {
            self.rooms
                .entry(room.to_string())
                .or_default()
                .insert(connection_id.to_string());
        }
        added
    }

    /// True when the connection was in the room.
    pub fn leave(&self, connection_id: &str, room: &str) -> bool {
        let removed = match self.connections.get_mut(connection_id) {
            Some(mut connection) => connection.rooms.remove(room),
            None => return false,
        };
        if removed {
            if let Some(mut members) = self.rooms.get_mut(room) {
                members.remove(connection_id);
            }
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
        removed
    }

    pub fn members(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    pub fn send_to(&self, connection_id: &str, event: &ServerEvent) -> bool {
        let Some(frame) = encode(event) else {
            return false;
        };
        match self.connections.get(connection_id) {
            Some(connection) => deliver(connection_id, &connection.tx, frame),
            None => false,
        }
    }

    /// Deliver to every socket of `user_id`; returns how many accepted it.
    pub fn send_to_user(&self, user_id: &str, event: &ServerEvent) -> usize {
        let targets: Vec<ConnectionId> = self
            .users
            .get(user_id)
            .map(|conns| conns.iter().cloned().collect())
            .unwrap_or_default();
        self.fan_out(targets, event)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.users
            .get(user_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    /// Deliver to room members except `skip`.
    pub fn broadcast_except(&self, room: &str, event: &ServerEvent, skip: Option<&str>) -> usize {
        let targets: Vec<ConnectionId> = self
            .rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .filter(|id| Some(id.as_str()) != skip)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        self.fan_out(targets, event)
    }

    fn fan_out(&self, targets: Vec<ConnectionId>, event: &ServerEvent) -> usize {
        if targets.is_empty() {
            return 0;
        }
        let Some(frame) = encode(event) else {
            return 0;
        };

        targets
            .iter()
            .filter(|id| {
                self.connections
                    .get(id.as_str())
                    .map(|c| deliver(id, &c.tx, frame.clone()))
                    .unwrap_or(false)
            })
            .count()
    }

    /// Tear down a connection: leave every room, stop typing, and tell the
    /// rooms it was in. A user's last socket also announces them offline.
    pub fn disconnect(&self, connection_id: &str) {
        let Some((_, connection)) = self.connections.remove(connection_id) else {
            return;
        };
        let user_id = connection.user_id;

        let mut remaining_sockets = 0;
        if let Some(mut conns) = self.users.get_mut(&user_id) {
            conns.remove(connection_id);
            remaining_sockets = conns.len();
        }
        self.users.remove_if(&user_id, |_, conns| conns.is_empty());

        for room in &connection.rooms {
            if let Some(mut members) = self.rooms.get_mut(room) {
                members.remove(connection_id);
            }
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }

        let went_offline = self.presence.disconnect(&user_id);
        if remaining_sockets == 0 {
            for room in self.presence.clear_user(&user_id) {
                self.broadcast(
                    &room,
                    &ServerEvent::UserStopTyping {
                        room: room.clone(),
                        user_id: user_id.clone(),
                    },
                );
            }
        }

        for room in &connection.rooms {
            self.broadcast(
                room,
                &ServerEvent::UserLeft {
                    room: room.clone(),
                    user_id: user_id.clone(),
                },
            );
            if went_offline {
                self.broadcast(
                    room,
                    &ServerEvent::UserStatus {
                        user_id: user_id.clone(),
                        status: PresenceStatus::Offline,
                    },
                );
            }
        }

        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            went_offline,
            "Socket disconnected"
        );
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl RoomBroadcaster for Gateway {
    fn broadcast(&self, room: &str, event: &ServerEvent) -> usize {
        self.broadcast_except(room, event, None)
    }
}
