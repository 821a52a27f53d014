pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod services;
pub mod startup;

use service_core::axum::{
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::middleware::{
    rate_limit::{ip_rate_limit_middleware, IpRateLimiter, KeyedRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::BrainstormConfig;
use crate::middleware::metrics_middleware;
use crate::realtime::{socket::ws_handler, Gateway};
use crate::services::{AccountDirectory, JwtService, SessionStore, TurnEngine, UsageGovernor};

#[derive(Clone)]
pub struct AppState {
    pub config: BrainstormConfig,
    pub engine: Arc<TurnEngine>,
    pub store: Arc<dyn SessionStore>,
    pub accounts: Arc<dyn AccountDirectory>,
    pub governor: UsageGovernor,
    pub gateway: Arc<Gateway>,
    pub jwt: JwtService,
    pub relay_limiter: KeyedRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

pub fn build_router(state: AppState) -> Router {
    let ip_limiter = state.ip_rate_limiter.clone();

    let protected = Router::new()
        .route(
            "/brainstorm",
            post(handlers::create_session).get(handlers::list_sessions),
        )
        .route(
            "/brainstorm/:id",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/brainstorm/:id/message", post(handlers::post_message))
        .route("/brainstorm/:id/continue", post(handlers::continue_session))
        .route("/brainstorm/:id/pause", post(handlers::pause_session))
        .route("/brainstorm/:id/resume", post(handlers::resume_session))
        .route("/brainstorm/:id/stop", post(handlers::stop_session))
        .route("/brainstorm/:id/export", get(handlers::export_session))
        .route("/usage/today", get(handlers::usage_today))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics::metrics))
        // Authenticates itself before upgrading
        .route("/ws", get(ws_handler))
        .merge(protected)
        .with_state(state.clone())
        // Global IP rate limiting
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    user_id = tracing::field::Empty,
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(
                    state
                        .config
                        .security
                        .allowed_origins
                        .iter()
                        .filter_map(|o| match o.parse::<HeaderValue>() {
                            Ok(origin) => Some(origin),
                            Err(e) => {
                                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                                None
                            }
                        })
                        .collect::<Vec<HeaderValue>>(),
                )
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
                .expose_headers([header::CONTENT_DISPOSITION]),
        )
}
