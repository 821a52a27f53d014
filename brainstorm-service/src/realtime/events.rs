//! Socket frames. Every frame is `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BrainstormError;
use crate::models::{Message, SessionStatus, Speaker};

pub fn brainstorm_room(session_id: &str) -> String {
    format!("brainstorm:{}", session_id)
}

pub fn chat_room(chat_id: &str) -> String {
    format!("chat:{}", chat_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "message:new")]
    MessageNew { room: String, message: Value },

    #[serde(rename = "message:edited")]
    MessageEdited { room: String, message: Value },

    #[serde(rename = "message:deleted")]
    MessageDeleted { room: String, message_id: String },

    #[serde(rename = "user:joined")]
    UserJoined { room: String, user_id: String },

    #[serde(rename = "user:left")]
    UserLeft { room: String, user_id: String },

    #[serde(rename = "user:typing")]
    UserTyping { room: String, user_id: String },

    #[serde(rename = "user:stop-typing")]
    UserStopTyping { room: String, user_id: String },

    #[serde(rename = "user:status")]
    UserStatus {
        user_id: String,
        status: PresenceStatus,
    },

    /// A persisted transcript message, or a client relay when `relayed_by`
    /// is set.
    #[serde(rename = "brainstorm:message")]
    BrainstormMessage {
        session_id: String,
        message: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        relayed_by: Option<String>,
    },

    #[serde(rename = "brainstorm:thinking")]
    BrainstormThinking { session_id: String, speaker: Speaker },

    #[serde(rename = "brainstorm:status")]
    BrainstormStatus {
        session_id: String,
        status: SessionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "brainstorm:deleted")]
    BrainstormDeleted { session_id: String },

    #[serde(rename = "brainstorm:joined")]
    BrainstormJoined { session_id: String },

    #[serde(rename = "pong")]
    Pong { timestamp: i64 },

    /// Scoped to the socket whose request failed.
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        event: Option<String>,
    },
}

impl ServerEvent {
    pub fn transcript_message(session_id: &str, message: &Message) -> Self {
        ServerEvent::BrainstormMessage {
            session_id: session_id.to_string(),
            message: serde_json::to_value(message).unwrap_or(Value::Null),
            relayed_by: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::MessageNew { .. } => "message:new",
            ServerEvent::MessageEdited { .. } => "message:edited",
            ServerEvent::MessageDeleted { .. } => "message:deleted",
            ServerEvent::UserJoined { .. } => "user:joined",
            ServerEvent::UserLeft { .. } => "user:left",
            ServerEvent::UserTyping { .. } => "user:typing",
            ServerEvent::UserStopTyping { .. } => "user:stop-typing",
            ServerEvent::UserStatus { .. } => "user:status",
            ServerEvent::BrainstormMessage { .. } => "brainstorm:message",
            ServerEvent::BrainstormThinking { .. } => "brainstorm:thinking",
            ServerEvent::BrainstormStatus { .. } => "brainstorm:status",
            ServerEvent::BrainstormDeleted { .. } => "brainstorm:deleted",
            ServerEvent::BrainstormJoined { .. } => "brainstorm:joined",
            ServerEvent::Pong { .. } => "pong",
            ServerEvent::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    #[serde(rename = "brainstorm:join")]
    BrainstormJoin { session_id: String },

    #[serde(rename = "brainstorm:leave")]
    BrainstormLeave { session_id: String },

    /// Relayed to the other room members; never persisted.
    #[serde(rename = "brainstorm:message")]
    BrainstormMessage { session_id: String, message: Value },

    #[serde(rename = "chat:join")]
    ChatJoin { chat_id: String },

    #[serde(rename = "chat:leave")]
    ChatLeave { chat_id: String },

    #[serde(rename = "typing:start")]
    TypingStart { room: String },

    #[serde(rename = "typing:stop")]
    TypingStop { room: String },

    #[serde(rename = "presence:away")]
    PresenceAway,

    #[serde(rename = "presence:online")]
    PresenceOnline,

    #[serde(rename = "ping")]
    Ping,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::BrainstormJoin { .. } => "brainstorm:join",
            ClientEvent::BrainstormLeave { .. } => "brainstorm:leave",
            ClientEvent::BrainstormMessage { .. } => "brainstorm:message",
            ClientEvent::ChatJoin { .. } => "chat:join",
            ClientEvent::ChatLeave { .. } => "chat:leave",
            ClientEvent::TypingStart { .. } => "typing:start",
            ClientEvent::TypingStop { .. } => "typing:stop",
            ClientEvent::PresenceAway => "presence:away",
            ClientEvent::PresenceOnline => "presence:online",
            ClientEvent::Ping => "ping",
        }
    }
}

/// Failure of one socket request, reported back on that socket only.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketError {
    pub code: &'static str,
    pub message: String,
}

impl SocketError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn session_not_found() -> Self {
        Self::new("NOT_FOUND", "Session not found")
    }

    pub fn into_event(self, event: Option<&str>) -> ServerEvent {
        ServerEvent::Error {
            code: self.code.to_string(),
            message: self.message,
            event: event.map(str::to_string),
        }
    }
}

impl From<BrainstormError> for SocketError {
    fn from(err: BrainstormError) -> Self {
        SocketError::new(err.code(), err.public_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_frames_are_event_and_data() {
        let frame = serde_json::to_value(ServerEvent::BrainstormThinking {
            session_id: "s1".into(),
            speaker: Speaker::Grok,
        })
        .unwrap();

        assert_eq!(
            frame,
            json!({ "event": "brainstorm:thinking", "data": { "sessionId": "s1", "speaker": "grok" } })
        );
    }

    #[test]
    fn parses_client_frames() {
        let join: ClientEvent = serde_json::from_value(
            json!({ "event": "brainstorm:join", "data": { "sessionId": "abc" } }),
        )
        .unwrap();
        assert!(matches!(join, ClientEvent::BrainstormJoin { ref session_id } if session_id == "abc"));

        let ping: ClientEvent = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert!(matches!(ping, ClientEvent::Ping));

        let typing: ClientEvent = serde_json::from_value(
            json!({ "event": "typing:start", "data": { "room": "chat:7" } }),
        )
        .unwrap();
        assert_eq!(typing.name(), "typing:start");
    }

    #[test]
    fn unknown_events_are_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"admin:drop-db"}"#).is_err());
    }

    #[test]
    fn error_event_names_the_request() {
        let frame = serde_json::to_value(
            SocketError::session_not_found().into_event(Some("brainstorm:join")),
        )
        .unwrap();
        assert_eq!(frame["event"], "error");
        assert_eq!(frame["data"]["code"], "NOT_FOUND");
        assert_eq!(frame["data"]["event"], "brainstorm:join");
    }
}
