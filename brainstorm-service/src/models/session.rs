//! The brainstorm session aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::{Attachment, Message, Speaker};
use super::status::{SessionAction, SessionStatus};
use crate::error::BrainstormError;

pub const MIN_TURN_DURATION_SECS: u32 = 30;
pub const MAX_TURN_DURATION_SECS: u32 = 120;
pub const MIN_MAX_TURNS: u32 = 5;
pub const MAX_MAX_TURNS: u32 = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationLevel {
    Strict,
    #[default]
    Moderate,
    Relaxed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscussionFormat {
    #[default]
    Collaborative,
    Debate,
    Socratic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    /// Seconds a single provider call may take.
    pub turn_duration: u32,
    pub max_turns: u32,
    pub moderation_level: ModerationLevel,
    pub format: DiscussionFormat,
}

impl SessionSettings {
    pub fn new(turn_duration: u32, max_turns: u32) -> Self {
        Self {
            turn_duration,
            max_turns,
            moderation_level: ModerationLevel::default(),
            format: DiscussionFormat::default(),
        }
    }

    pub fn validate(&self) -> Result<(), BrainstormError> {
        if !(MIN_TURN_DURATION_SECS..=MAX_TURN_DURATION_SECS).contains(&self.turn_duration) {
            return Err(BrainstormError::Validation(format!(
                "turnDuration must be between {} and {} seconds",
                MIN_TURN_DURATION_SECS, MAX_TURN_DURATION_SECS
            )));
        }
        if !(MIN_MAX_TURNS..=MAX_MAX_TURNS).contains(&self.max_turns) {
            return Err(BrainstormError::Validation(format!(
                "maxTurns must be between {} and {}",
                MIN_MAX_TURNS, MAX_MAX_TURNS
            )));
        }
        Ok(())
    }

    pub fn turn_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.turn_duration))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub model: String,
    pub system_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participants {
    pub claude: Participant,
    pub grok: Participant,
}

impl Participants {
    /// `None` for the human speaker, who has no participant profile.
    pub fn for_speaker(&self, speaker: Speaker) -> Option<&Participant> {
        match speaker {
            Speaker::Claude => Some(&self.claude),
            Speaker::Grok => Some(&self.grok),
            Speaker::User => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub topic: String,
    #[serde(default)]
    pub description: String,
    pub participants: Participants,
    /// Append-only; insertion order is the conversation order.
    #[serde(default)]
    pub messages: Vec<Message>,
    pub status: SessionStatus,
    pub settings: SessionSettings,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,
    /// Whole seconds between creation and stop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Description of the provider failure that ended the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Bumped by the store on every successful save.
    #[serde(default)]
    pub version: u64,
}

impl Session {
    pub fn new(
        user_id: String,
        topic: String,
        description: String,
        participants: Participants,
        settings: SessionSettings,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            topic,
            description,
            participants,
            messages: Vec::new(),
            status: SessionStatus::Active,
            settings,
            total_tokens: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            duration: None,
            error: None,
            version: 0,
        }
    }

    /// Completed AI rounds: half the number of AI-authored messages.
    pub fn current_turn(&self) -> u32 {
        let ai_messages = self.messages.iter().filter(|m| m.speaker.is_ai()).count();
        (ai_messages / 2) as u32
    }

    pub fn is_finished(&self) -> bool {
        self.status == SessionStatus::Completed || self.current_turn() >= self.settings.max_turns
    }

    /// Claude opens; afterwards the last AI speaker hands over to the other
    /// one. User interjections are skipped and never reset the alternation.
    pub fn next_speaker(&self) -> Speaker {
        self.messages
            .iter()
            .rev()
            .find(|m| m.speaker.is_ai())
            .map(|last| last.speaker.opposite())
            .unwrap_or(Speaker::Claude)
    }

    /// Append a message and account its tokens. The caller persists.
    pub fn add_message(
        &mut self,
        speaker: Speaker,
        content: String,
        attachments: Vec<Attachment>,
        tokens: u64,
    ) -> Result<Message, BrainstormError> {
        let message = Message::new(speaker, content, attachments, tokens)?;
        self.total_tokens = self.total_tokens.saturating_add(tokens);
        self.updated_at = message.timestamp;
        self.messages.push(message.clone());
        Ok(message)
    }

    /// Run `action` through the state machine and stamp its side effects.
    pub fn apply(&mut self, action: SessionAction) -> Result<SessionStatus, BrainstormError> {
        let next = self.status.transition(action)?;
        let now = Utc::now();

        if next == SessionStatus::Completed {
            self.completed_at = Some(now);
            self.duration = Some((now - self.created_at).num_seconds().max(0) as u64);
        }
        self.status = next;
        self.updated_at = now;
        Ok(next)
    }

    /// Move an active session to `error`, keeping every prior message.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), BrainstormError> {
        self.apply(SessionAction::Fail)?;
        self.error = Some(reason.into());
        Ok(())
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            topic: self.topic.clone(),
            status: self.status,
            message_count: self.messages.len(),
            current_turn: self.current_turn(),
            max_turns: self.settings.max_turns,
            total_tokens: self.total_tokens,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Lightweight listing row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub topic: String,
    pub status: SessionStatus,
    pub message_count: usize,
    pub current_turn: u32,
    pub max_turns: u32,
    pub total_tokens: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
