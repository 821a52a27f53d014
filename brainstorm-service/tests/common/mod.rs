//! Shared setup for brainstorm-service integration tests: in-memory
//! backends, scripted providers and HS256 tokens.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use brainstorm_service::{
    build_router,
    config::{
        BrainstormConfig, Environment, JwtConfig, ParticipantsConfig, ProviderConfig,
        RealtimeConfig, SecurityConfig, TurnConfig, UsageLimitsConfig,
    },
    models::{Account, UsageTier},
    services::{
        InMemoryAccountDirectory, InMemorySessionStore, InMemoryUsageStore, JwtService,
        MockCompletionProvider, ProviderSet,
    },
    startup::{build_state, Backends},
    AppState,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

pub const TEST_JWT_SECRET: &str = "brainstorm-test-secret";

pub fn test_config(free_limit: u64) -> BrainstormConfig {
    BrainstormConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Test,
        service_name: "brainstorm-service".to_string(),
        mongodb: None,
        jwt: JwtConfig {
            secret: Some(TEST_JWT_SECRET.to_string()),
            public_key_path: None,
        },
        participants: ParticipantsConfig {
            claude: ProviderConfig {
                model: "claude-test".to_string(),
                endpoint: None,
                api_key: None,
            },
            grok: ProviderConfig {
                model: "grok-test".to_string(),
                endpoint: None,
                api_key: None,
            },
        },
        turns: TurnConfig {
            lock_timeout_ms: 200,
            ..TurnConfig::default()
        },
        usage: UsageLimitsConfig {
            free: Some(free_limit),
            pro: Some(200),
            business: None,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
        realtime: RealtimeConfig::default(),
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub accounts: InMemoryAccountDirectory,
    pub usage: InMemoryUsageStore,
    pub claude: Arc<MockCompletionProvider>,
    pub grok: Arc<MockCompletionProvider>,
    pub jwt: JwtService,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_options(20, Duration::ZERO)
    }

    /// `free_limit` caps the free tier; `provider_delay` slows both mocks.
    pub fn with_options(free_limit: u64, provider_delay: Duration) -> Self {
        let claude = Arc::new(MockCompletionProvider::new("Claude").with_delay(provider_delay));
        let grok = Arc::new(MockCompletionProvider::new("Grok").with_delay(provider_delay));

        let accounts = InMemoryAccountDirectory::new();
        let usage = InMemoryUsageStore::new();
        let backends = Backends {
            store: Arc::new(InMemorySessionStore::new()),
            accounts: Arc::new(accounts.clone()),
            counters: Arc::new(usage.clone()),
            providers: ProviderSet {
                claude: claude.clone(),
                grok: grok.clone(),
            },
        };

        let jwt = JwtService::from_secret(TEST_JWT_SECRET);
        let state = build_state(test_config(free_limit), jwt.clone(), backends);
        let router = build_router(state.clone());

        Self {
            router,
            state,
            accounts,
            usage,
            claude,
            grok,
            jwt,
        }
    }

    /// Register an active account and return a bearer token for it.
    pub fn user(&self, user_id: &str, tier: UsageTier) -> String {
        self.accounts.upsert(Account::new(user_id, tier));
        self.token(user_id)
    }

    pub fn token(&self, user_id: &str) -> String {
        self.jwt
            .generate_access_token(user_id, chrono::Duration::minutes(15))
            .expect("Failed to sign test token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, _, bytes) = self.raw_request(method, uri, token, body).await;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn raw_request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, headers, bytes)
    }

    pub async fn start_session(&self, token: &str, max_turns: u32) -> String {
        let (status, body) = self
            .request(
                Method::POST,
                "/brainstorm",
                Some(token),
                Some(serde_json::json!({
                    "topic": "AI Ethics",
                    "settings": { "turnDuration": 30, "maxTurns": max_turns }
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "start failed: {}", body);
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn continue_turn(&self, token: &str, session_id: &str) -> (StatusCode, Value) {
        self.request(
            Method::POST,
            &format!("/brainstorm/{}/continue", session_id),
            Some(token),
            None,
        )
        .await
    }
}

/// Drain every frame currently queued for a socket.
pub fn drain(rx: &mut tokio::sync::mpsc::Receiver<String>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(serde_json::from_str(&frame).unwrap());
    }
    frames
}

pub fn event_names(frames: &[Value]) -> Vec<String> {
    frames
        .iter()
        .map(|f| f["event"].as_str().unwrap_or_default().to_string())
        .collect()
}
