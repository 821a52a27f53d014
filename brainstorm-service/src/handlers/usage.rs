use axum::{extract::State, Json};
use chrono::Utc;
use service_core::error::AppError;

use crate::{middleware::AuthUser, models::UsageSnapshot, AppState};

pub async fn usage_today(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<UsageSnapshot>, AppError> {
    let snapshot = state
        .governor
        .snapshot(&user.id, user.tier, Utc::now())
        .await?;
    Ok(Json(snapshot))
}
