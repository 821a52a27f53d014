//! Messages and attachments owned by a brainstorm session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BrainstormError;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Claude,
    Grok,
    User,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Claude => "claude",
            Speaker::Grok => "grok",
            Speaker::User => "user",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Speaker::Claude => "Claude",
            Speaker::Grok => "Grok",
            Speaker::User => "User",
        }
    }

    pub fn is_ai(&self) -> bool {
        !matches!(self, Speaker::User)
    }

    /// The participant that answers this one. Users hand the floor to Claude.
    pub fn opposite(&self) -> Speaker {
        match self {
            Speaker::Claude => Speaker::Grok,
            Speaker::Grok | Speaker::User => Speaker::Claude,
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentType {
    Image,
    Document,
    Code,
    Other,
}

impl AttachmentType {
    /// Best-effort classification used when a client omits `type`.
    pub fn from_mime(mime_type: &str) -> Self {
        let mime = mime_type.to_ascii_lowercase();
        if mime.starts_with("image/") {
            AttachmentType::Image
        } else if mime == "application/pdf"
            || mime.contains("msword")
            || mime.contains("officedocument")
            || mime == "text/markdown"
            || mime == "text/plain"
        {
            AttachmentType::Document
        } else if mime.starts_with("text/")
            || mime.contains("javascript")
            || mime.contains("json")
            || mime.contains("x-python")
            || mime.contains("x-rust")
            || mime.contains("typescript")
        {
            AttachmentType::Code
        } else {
            AttachmentType::Other
        }
    }
}

/// A file reference carried by a message. Storage itself lives elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub name: String,
    /// Storage reference (URL or object key).
    pub url: String,
    #[serde(rename = "type")]
    pub kind: AttachmentType,
    pub size: u64,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl Attachment {
    pub fn new(name: String, url: String, mime_type: String, size: u64) -> Self {
        let kind = AttachmentType::from_mime(&mime_type);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            url,
            kind,
            size,
            mime_type,
            project_id: None,
        }
    }

    pub fn validate(&self) -> Result<(), BrainstormError> {
        if self.name.trim().is_empty() {
            return Err(BrainstormError::Validation(
                "attachment name is required".to_string(),
            ));
        }
        if self.url.trim().is_empty() {
            return Err(BrainstormError::Validation(format!(
                "attachment '{}' has no storage reference",
                self.name
            )));
        }
        if self.mime_type.trim().is_empty() {
            return Err(BrainstormError::Validation(format!(
                "attachment '{}' has no mime type",
                self.name
            )));
        }
        Ok(())
    }
}

/// One entry of a session transcript. Only reachable through its session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub speaker: Speaker,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tokens: u64,
}

impl Message {
    /// Build a message, rejecting one with neither text nor attachments.
    pub fn new(
        speaker: Speaker,
        content: String,
        attachments: Vec<Attachment>,
        tokens: u64,
    ) -> Result<Self, BrainstormError> {
        if content.trim().is_empty() && attachments.is_empty() {
            return Err(BrainstormError::Validation(
                "message must have content or at least one attachment".to_string(),
            ));
        }
        for attachment in &attachments {
            attachment.validate()?;
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            speaker,
            content,
            attachments,
            timestamp: Utc::now(),
            tokens,
        })
    }
}
