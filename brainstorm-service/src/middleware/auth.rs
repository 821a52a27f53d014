use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::models::Account;
use crate::AppState;

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolve a bearer token to an active account.
///
/// Unknown accounts are rejected like bad tokens; deactivated accounts get
/// `403` so clients can tell the two apart.
pub async fn authenticate(state: &AppState, token: &str) -> Result<Account, AppError> {
    let claims = state.jwt.validate_access_token(token).map_err(|e| {
        tracing::debug!(error = %e, "Rejected access token");
        AppError::Unauthorized(anyhow::anyhow!("Invalid or expired token"))
    })?;

    let account = state
        .accounts
        .find(&claims.sub)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Unknown account")))?;

    if !account.active {
        tracing::info!(user_id = %account.id, "Inactive account rejected");
        return Err(AppError::Forbidden(anyhow::anyhow!("Account is inactive")));
    }

    Ok(account)
}

/// Middleware to require an authenticated, active account
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers()).ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
    })?;

    let account = authenticate(&state, token).await?;
    tracing::Span::current().record("user_id", account.id.as_str());

    req.extensions_mut().insert(account);
    Ok(next.run(req).await)
}

/// Extractor for the account placed by `auth_middleware`
pub struct AuthUser(pub Account);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let account = parts.extensions.get::<Account>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Account missing from request extensions"
            ))
        })?;

        Ok(AuthUser(account.clone()))
    }
}
