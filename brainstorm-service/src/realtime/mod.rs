pub mod events;
pub mod presence;
pub mod registry;
pub mod socket;

pub use events::{brainstorm_room, chat_room, ClientEvent, PresenceStatus, ServerEvent, SocketError};
pub use registry::{ConnectionId, Gateway};

/// Room-scoped fan-out used by the turn engine.
pub trait RoomBroadcaster: Send + Sync {
    /// Returns how many sockets accepted the frame.
    fn broadcast(&self, room: &str, event: &ServerEvent) -> usize;
}
