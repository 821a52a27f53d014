//! AI completion provider abstraction.
//!
//! The engine only needs one opaque call per turn. Vendor wire protocols
//! live behind this trait and are not modelled here.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::models::{Attachment, Speaker};

/// Error type for provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Network error: {0}")]
    NetworkError(String),
}

/// One prior message as seen by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMessage {
    pub speaker: Speaker,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    /// Oldest first, already bounded by the caller.
    pub context: Vec<ContextMessage>,
    /// Attachments referenced anywhere in `context`.
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResponse {
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub tokens_used: u64,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest)
        -> Result<CompletionResponse, ProviderError>;
}

/// The provider backing each AI participant.
#[derive(Clone)]
pub struct ProviderSet {
    pub claude: Arc<dyn CompletionProvider>,
    pub grok: Arc<dyn CompletionProvider>,
}

impl ProviderSet {
    pub fn for_speaker(&self, speaker: Speaker) -> Option<Arc<dyn CompletionProvider>> {
        match speaker {
            Speaker::Claude => Some(self.claude.clone()),
            Speaker::Grok => Some(self.grok.clone()),
            Speaker::User => None,
        }
    }
}
