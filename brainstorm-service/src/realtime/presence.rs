//! Ephemeral presence and typing state.
//!
//! Process-local and advisory: nothing here gates correctness, and all of it
//! is lost on restart. Mutators report whether anything changed so callers
//! broadcast only real transitions.

use dashmap::DashMap;
use std::collections::HashSet;

use super::events::PresenceStatus;

#[derive(Debug, Clone, Copy)]
struct UserPresence {
    connections: usize,
    away: bool,
}

#[derive(Default)]
pub struct PresenceTracker {
    users: DashMap<String, UserPresence>,
    typing: DashMap<String, HashSet<String>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new connection. True when the user just came online.
    pub fn connect(&self, user_id: &str) -> bool {
        let mut entry = self
            .users
            .entry(user_id.to_string())
            .or_insert(UserPresence {
                connections: 0,
                away: false,
            });
        entry.connections += 1;
        entry.connections == 1
    }

    /// Drop one connection. True when it was the user's last one.
    pub fn disconnect(&self, user_id: &str) -> bool {
        let went_offline = match self.users.get_mut(user_id) {
            Some(mut entry) => {
                entry.connections = entry.connections.saturating_sub(1);
                entry.connections == 0
            }
            None => return false,
        };

        if went_offline {
            self.users.remove_if(user_id, |_, p| p.connections == 0);
        }
        went_offline
    }

    pub fn status(&self, user_id: &str) -> PresenceStatus {
        match self.users.get(user_id) {
            Some(p) if p.connections > 0 && p.away => PresenceStatus::Away,
            Some(p) if p.connections > 0 => PresenceStatus::Online,
            _ => PresenceStatus::Offline,
        }
    }

    /// Toggle away/online for a connected user. True when it changed.
    pub fn set_away(&self, user_id: &str, away: bool) -> bool {
        match self.users.get_mut(user_id) {
            Some(mut p) if p.away != away => {
                p.away = away;
                true
            }
            _ => false,
        }
    }

    pub fn set_typing(&self, room: &str, user_id: &str) -> bool {
        self.typing
            .entry(room.to_string())
            .or_default()
            .insert(user_id.to_string())
    }

    pub fn clear_typing(&self, room: &str, user_id: &str) -> bool {
        let removed = self
            .typing
            .get_mut(room)
            .map(|mut users| users.remove(user_id))
            .unwrap_or(false);
        self.typing.remove_if(room, |_, users| users.is_empty());
        removed
    }

    /// Clear the user's typing flag everywhere; returns the affected rooms.
    pub fn clear_user(&self, user_id: &str) -> Vec<String> {
        let rooms: Vec<String> = self
            .typing
            .iter()
            .filter(|entry| entry.value().contains(user_id))
            .map(|entry| entry.key().clone())
            .collect();

        for room in &rooms {
            self.clear_typing(room, user_id);
        }
        rooms
    }
}
