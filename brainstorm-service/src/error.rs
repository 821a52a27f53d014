//! Domain errors for brainstorm sessions and their transport mappings.

use chrono::{DateTime, Utc};
use serde_json::json;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrainstormError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Unknown and foreign sessions are deliberately indistinguishable.
    #[error("Session not found")]
    NotFound,

    #[error("Daily usage limit of {limit} reached ({used} used), resets at {reset_at}")]
    UsageLimitExceeded {
        limit: u64,
        used: u64,
        reset_at: DateTime<Utc>,
    },

    #[error("Provider failure: {0}")]
    ProviderFailure(String),

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Store error: {0}")]
    Store(anyhow::Error),
}

impl BrainstormError {
    /// Stable machine-readable code carried by socket `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            BrainstormError::Validation(_) => "VALIDATION_ERROR",
            BrainstormError::InvalidState(_) => "INVALID_STATE",
            BrainstormError::NotFound => "NOT_FOUND",
            BrainstormError::UsageLimitExceeded { .. } => "USAGE_LIMIT_EXCEEDED",
            BrainstormError::ProviderFailure(_) => "PROVIDER_FAILURE",
            BrainstormError::ConcurrencyConflict(_) => "CONCURRENCY_CONFLICT",
            BrainstormError::Store(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show a client. Store failures are not echoed.
    pub fn public_message(&self) -> String {
        match self {
            BrainstormError::Store(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<mongodb::error::Error> for BrainstormError {
    fn from(err: mongodb::error::Error) -> Self {
        BrainstormError::Store(anyhow::Error::new(err))
    }
}

impl From<AppError> for BrainstormError {
    fn from(err: AppError) -> Self {
        BrainstormError::Store(anyhow::anyhow!(err.to_string()))
    }
}

impl From<BrainstormError> for AppError {
    fn from(err: BrainstormError) -> Self {
        match err {
            BrainstormError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            BrainstormError::InvalidState(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            BrainstormError::NotFound => AppError::NotFound(anyhow::anyhow!("Session not found")),
            BrainstormError::UsageLimitExceeded {
                limit,
                used,
                reset_at,
            } => {
                let retry_after = (reset_at - Utc::now()).num_seconds().max(1) as u64;
                AppError::TooManyRequests {
                    message: "Daily usage limit reached".to_string(),
                    retry_after: Some(retry_after),
                    details: Some(json!({
                        "limit": limit,
                        "used": used,
                        "resetAt": reset_at.to_rfc3339(),
                    })),
                }
            }
            BrainstormError::ProviderFailure(msg) => AppError::BadGateway(msg),
            BrainstormError::ConcurrencyConflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            BrainstormError::Store(e) => {
                tracing::error!(error = %e, "Session store failure");
                AppError::DatabaseError(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    fn status_of(err: BrainstormError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn maps_to_http_statuses() {
        assert_eq!(
            status_of(BrainstormError::Validation("empty".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(BrainstormError::InvalidState("paused".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(BrainstormError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(BrainstormError::ProviderFailure("timeout".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(BrainstormError::ConcurrencyConflict("locked".into())),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn usage_limit_carries_retry_after() {
        let reset_at = Utc::now() + chrono::Duration::hours(3);
        let res = AppError::from(BrainstormError::UsageLimitExceeded {
            limit: 20,
            used: 20,
            reset_at,
        })
        .into_response();

        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry: u64 = res
            .headers()
            .get(axum::http::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap();
        assert!(retry > 3 * 3600 - 60 && retry <= 3 * 3600);
    }

    #[test]
    fn store_errors_are_not_echoed() {
        let err = BrainstormError::Store(anyhow::anyhow!("connection refused on 10.0.0.4"));
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(err.public_message(), "Internal server error");
    }
}
