use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::models::{
    Attachment, AttachmentType, DiscussionFormat, Message, ModerationLevel, Participants, Session,
    SessionSettings, SessionStatus,
};
use crate::services::engine::NewSession;
use crate::services::export::ExportFormat;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    #[validate(length(min = 1, max = 500, message = "Topic must be 1-500 characters"))]
    pub topic: String,

    #[validate(length(max = 5000, message = "Description must be at most 5000 characters"))]
    pub description: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Model name must be 1-100 characters"))]
    pub claude_model: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Model name must be 1-100 characters"))]
    pub grok_model: Option<String>,

    #[validate(nested)]
    pub settings: Option<SettingsRequest>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SettingsRequest {
    #[validate(range(min = 30, max = 120, message = "turnDuration must be 30-120 seconds"))]
    pub turn_duration: Option<u32>,

    #[validate(range(min = 5, max = 50, message = "maxTurns must be 5-50"))]
    pub max_turns: Option<u32>,

    pub moderation_level: Option<ModerationLevel>,

    pub format: Option<DiscussionFormat>,
}

impl From<StartSessionRequest> for NewSession {
    fn from(req: StartSessionRequest) -> Self {
        let settings = req.settings.unwrap_or_default();
        NewSession {
            topic: req.topic,
            description: req.description,
            claude_model: req.claude_model,
            grok_model: req.grok_model,
            turn_duration: settings.turn_duration,
            max_turns: settings.max_turns,
            moderation_level: settings.moderation_level,
            format: settings.format,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRequest {
    pub id: Option<String>,

    #[validate(length(min = 1, max = 255, message = "Attachment name must be 1-255 characters"))]
    pub name: String,

    #[validate(length(min = 1, max = 2048, message = "Attachment url must be 1-2048 characters"))]
    pub url: String,

    /// Inferred from `mimeType` when omitted.
    #[serde(rename = "type")]
    pub kind: Option<AttachmentType>,

    #[serde(default)]
    pub size: u64,

    #[validate(length(min = 1, max = 255, message = "Attachment mimeType is required"))]
    pub mime_type: String,

    pub project_id: Option<String>,
}

impl From<AttachmentRequest> for Attachment {
    fn from(req: AttachmentRequest) -> Self {
        let mut attachment = Attachment::new(req.name, req.url, req.mime_type, req.size);
        if let Some(id) = req.id.filter(|id| !id.trim().is_empty()) {
            attachment.id = id;
        }
        if let Some(kind) = req.kind {
            attachment.kind = kind;
        }
        attachment.project_id = req.project_id;
        attachment
    }
}

pub const MAX_ATTACHMENTS_PER_MESSAGE: usize = 10;

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_attachment_count"))]
pub struct UserMessageRequest {
    #[serde(default)]
    #[validate(length(max = 20000, message = "Message must be at most 20000 characters"))]
    pub content: String,

    #[serde(default)]
    #[validate(nested)]
    pub attachments: Vec<AttachmentRequest>,
}

// Kept at struct level so the cap never shares a field entry with the
// per-attachment errors.
fn validate_attachment_count(req: &UserMessageRequest) -> Result<(), ValidationError> {
    if req.attachments.len() > MAX_ATTACHMENTS_PER_MESSAGE {
        let mut error = ValidationError::new("too_many_attachments");
        error.message = Some("At most 10 attachments per message".into());
        return Err(error);
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: ExportFormat,
}

/// HTTP view of a session, including the derived turn counters.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: String,
    pub user_id: String,
    pub topic: String,
    pub description: String,
    pub participants: Participants,
    pub messages: Vec<Message>,
    pub status: SessionStatus,
    pub settings: SessionSettings,
    pub total_tokens: u64,
    pub current_turn: u32,
    pub is_finished: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        let current_turn = session.current_turn();
        let is_finished = session.is_finished();
        SessionResponse {
            id: session.id,
            user_id: session.user_id,
            topic: session.topic,
            description: session.description,
            participants: session.participants,
            messages: session.messages,
            status: session.status,
            settings: session.settings,
            total_tokens: session.total_tokens,
            current_turn,
            is_finished,
            created_at: session.created_at,
            updated_at: session.updated_at,
            completed_at: session.completed_at,
            duration: session.duration,
            error: session.error,
        }
    }
}
