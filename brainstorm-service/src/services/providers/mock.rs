//! Scripted provider for tests and local development.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::{CompletionProvider, CompletionRequest, CompletionResponse, ProviderError};

pub struct MockCompletionProvider {
    label: String,
    delay: Duration,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockCompletionProvider {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            delay: Duration::from_millis(0),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// While set, every call fails with an API error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for MockCompletionProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::ApiError(format!(
                "{} mock provider is failing",
                self.label
            )));
        }

        let prompt_tokens: usize = request.context.iter().map(|m| m.content.len() / 4).sum();
        let content = format!(
            "{} ({}) reply #{} after {} messages",
            self.label,
            request.model,
            call,
            request.context.len()
        );

        Ok(CompletionResponse {
            tokens_used: (prompt_tokens + content.len() / 4) as u64 + 1,
            content,
            attachments: Vec::new(),
        })
    }
}
