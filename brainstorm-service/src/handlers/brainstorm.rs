use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::{
    dtos::{ExportQuery, SessionResponse, StartSessionRequest, UserMessageRequest},
    middleware::AuthUser,
    models::{Attachment, Message, SessionSummary},
    AppState,
};

pub async fn create_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<StartSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let session = state.engine.start(&user, req.into()).await?;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(session))))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<SessionSummary>>, AppError> {
    Ok(Json(state.engine.list(&user).await?))
}

pub async fn get_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = state.engine.get(&user, &id).await?;
    Ok(Json(session.into()))
}

pub async fn delete_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.engine.delete(&user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn post_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UserMessageRequest>,
) -> Result<Json<Message>, AppError> {
    req.validate()?;

    let attachments: Vec<Attachment> = req.attachments.into_iter().map(Attachment::from).collect();
    let message = state
        .engine
        .post_user_message(&user, &id, req.content, attachments)
        .await?;
    Ok(Json(message))
}

pub async fn continue_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Message>, AppError> {
    let message = state.engine.continue_discussion(&user, &id).await?;
    Ok(Json(message))
}

pub async fn pause_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = state.engine.pause(&user, &id).await?;
    Ok(Json(session.into()))
}

pub async fn resume_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = state.engine.resume(&user, &id).await?;
    Ok(Json(session.into()))
}

pub async fn stop_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = state.engine.stop(&user, &id).await?;
    Ok(Json(session.into()))
}

pub async fn export_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, AppError> {
    let transcript = state.engine.export(&user, &id, query.format).await?;

    let disposition = format!("attachment; filename=\"{}\"", transcript.file_name);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, transcript.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        transcript.body,
    ))
}
