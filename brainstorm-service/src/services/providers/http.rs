//! Generic JSON-over-HTTP completion provider.
//!
//! Posts the `CompletionRequest` as camelCase JSON and expects
//! `{ "content", "attachments"?, "tokensUsed"? }` back. Adapting to a
//! particular vendor is the job of whatever sits at `endpoint`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::{CompletionProvider, CompletionRequest, CompletionResponse, ProviderError};

pub struct HttpCompletionProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpCompletionProvider {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                model = %request.model,
                "Completion endpoint returned an error"
            );
            return Err(ProviderError::ApiError(format!("{}: {}", status, body)));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        if completion.content.trim().is_empty() && completion.attachments.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "completion has neither content nor attachments".to_string(),
            ));
        }

        Ok(completion)
    }
}
