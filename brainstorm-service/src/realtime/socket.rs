//! `GET /ws`: authenticated upgrade, per-connection reader/writer tasks and
//! client event dispatch.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use service_core::error::AppError;
use service_core::middleware::rate_limit::check_keyed;
use std::time::Duration;

use super::events::{brainstorm_room, chat_room, ClientEvent, PresenceStatus, ServerEvent, SocketError};
use super::RoomBroadcaster;
use crate::middleware::{authenticate, bearer_token};
use crate::models::Account;
use crate::services::metrics;
use crate::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const MAX_FRAME_BYTES: usize = 64 * 1024;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Identity of one live socket.
#[derive(Debug, Clone)]
pub struct SocketContext {
    pub connection_id: String,
    pub user: Account,
}

/// Authenticate before upgrading, so a rejected client never gets a socket.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    let token = bearer_token(&headers)
        .map(str::to_string)
        .or(query.token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing access token")))?;

    let user = authenticate(&state, &token).await?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    Ok(ws
        .max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state, user)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: Account) {
    let (connection_id, mut rx) = state.gateway.register(&user.id);
    metrics::socket_opened();
    tracing::info!(
        connection_id = %connection_id,
        user_id = %user.id,
        "Socket connected"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_id = connection_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    match frame {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_id, "Sent ping");
                }
            }
        }
    });

    let ctx = SocketContext {
        connection_id: connection_id.clone(),
        user,
    };
    let reader_state = state.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => handle_frame(&reader_state, &ctx, &text).await,
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    state.gateway.disconnect(&connection_id);
    metrics::socket_closed();
}

/// Parse and dispatch one text frame. Failures are answered on this socket
/// only; the connection stays open.
pub async fn handle_frame(state: &AppState, ctx: &SocketContext, text: &str) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(connection_id = %ctx.connection_id, error = %e, "Malformed socket frame");
            state.gateway.send_to(
                &ctx.connection_id,
                &SocketError::new("INVALID_EVENT", "Unrecognized or malformed event")
                    .into_event(None),
            );
            return;
        }
    };

    let name = event.name();
    if let Err(err) = dispatch(state, ctx, event).await {
        tracing::debug!(
            connection_id = %ctx.connection_id,
            event = name,
            code = err.code,
            "Socket request failed"
        );
        state
            .gateway
            .send_to(&ctx.connection_id, &err.into_event(Some(name)));
    }
}

fn require_member(state: &AppState, ctx: &SocketContext, room: &str) -> Result<(), SocketError> {
    if state.gateway.is_member(&ctx.connection_id, room) {
        Ok(())
    } else {
        Err(SocketError::new("NOT_A_MEMBER", format!("Not a member of {}", room)))
    }
}

fn join_room(state: &AppState, ctx: &SocketContext, room: &str) {
    if state.gateway.join(&ctx.connection_id, room) {
        state.gateway.broadcast_except(
            room,
            &ServerEvent::UserJoined {
                room: room.to_string(),
                user_id: ctx.user.id.clone(),
            },
            Some(&ctx.connection_id),
        );
    }
}

fn leave_room(state: &AppState, ctx: &SocketContext, room: &str) {
    if !state.gateway.leave(&ctx.connection_id, room) {
        return;
    }
    let presence = state.gateway.presence();
    if presence.clear_typing(room, &ctx.user.id) {
        state.gateway.broadcast(
            room,
            &ServerEvent::UserStopTyping {
                room: room.to_string(),
                user_id: ctx.user.id.clone(),
            },
        );
    }
    state.gateway.broadcast(
        room,
        &ServerEvent::UserLeft {
            room: room.to_string(),
            user_id: ctx.user.id.clone(),
        },
    );
}

fn announce_status(state: &AppState, user_id: &str, status: PresenceStatus) {
    let event = ServerEvent::UserStatus {
        user_id: user_id.to_string(),
        status,
    };
    for room in state.gateway.rooms_of_user(user_id) {
        state.gateway.broadcast(&room, &event);
    }
}

/// Announce only real changes; the tracker folds duplicate reports.
fn set_away(state: &AppState, ctx: &SocketContext, away: bool) {
    let presence = state.gateway.presence();
    if presence.set_away(&ctx.user.id, away) {
        announce_status(state, &ctx.user.id, presence.status(&ctx.user.id));
    }
}

pub async fn dispatch(
    state: &AppState,
    ctx: &SocketContext,
    event: ClientEvent,
) -> Result<(), SocketError> {
    match event {
        ClientEvent::BrainstormJoin { session_id } => {
            // Ownership is re-checked on every join; foreign and unknown
            // sessions answer identically.
            state.store.load(&session_id, &ctx.user.id).await?;

            join_room(state, ctx, &brainstorm_room(&session_id));
            state
                .gateway
                .send_to(&ctx.connection_id, &ServerEvent::BrainstormJoined { session_id });
        }
        ClientEvent::BrainstormLeave { session_id } => {
            leave_room(state, ctx, &brainstorm_room(&session_id));
        }
        ClientEvent::BrainstormMessage {
            session_id,
            message,
        } => {
            let room = brainstorm_room(&session_id);
            require_member(state, ctx, &room)?;

            if let Some(wait) = check_keyed(&state.relay_limiter, &ctx.user.id) {
                return Err(SocketError::new(
                    "RATE_LIMITED",
                    format!("Too many relayed messages, retry in {}s", wait),
                ));
            }

            state.gateway.broadcast_except(
                &room,
                &ServerEvent::BrainstormMessage {
                    session_id,
                    message,
                    relayed_by: Some(ctx.user.id.clone()),
                },
                Some(&ctx.connection_id),
            );
        }
        ClientEvent::ChatJoin { chat_id } => {
            if chat_id.trim().is_empty() {
                return Err(SocketError::new("VALIDATION_ERROR", "chatId is required"));
            }
            join_room(state, ctx, &chat_room(&chat_id));
        }
        ClientEvent::ChatLeave { chat_id } => {
            leave_room(state, ctx, &chat_room(&chat_id));
        }
        ClientEvent::TypingStart { room } => {
            require_member(state, ctx, &room)?;
            if state.gateway.presence().set_typing(&room, &ctx.user.id) {
                state.gateway.broadcast_except(
                    &room,
                    &ServerEvent::UserTyping {
                        room: room.clone(),
                        user_id: ctx.user.id.clone(),
                    },
                    Some(&ctx.connection_id),
                );
            }
        }
        ClientEvent::TypingStop { room } => {
            require_member(state, ctx, &room)?;
            if state.gateway.presence().clear_typing(&room, &ctx.user.id) {
                state.gateway.broadcast_except(
                    &room,
                    &ServerEvent::UserStopTyping {
                        room: room.clone(),
                        user_id: ctx.user.id.clone(),
                    },
                    Some(&ctx.connection_id),
                );
            }
        }
        ClientEvent::PresenceAway => set_away(state, ctx, true),
        ClientEvent::PresenceOnline => set_away(state, ctx, false),
        ClientEvent::Ping => {
            state.gateway.send_to(
                &ctx.connection_id,
                &ServerEvent::Pong {
                    timestamp: Utc::now().timestamp_millis(),
                },
            );
        }
    }
    Ok(())
}
