use service_core::error::AppError;
use service_core::middleware::rate_limit::{create_ip_rate_limiter, create_keyed_rate_limiter};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::{BrainstormConfig, ProviderConfig};
use crate::realtime::{Gateway, RoomBroadcaster};
use crate::services::{
    AccountDirectory, BrainstormDb, CompletionProvider, HttpCompletionProvider,
    InMemoryAccountDirectory, InMemorySessionStore, InMemoryUsageStore, JwtService,
    MockCompletionProvider, MongoAccountDirectory, MongoSessionStore, MongoUsageStore,
    ProviderSet, SessionStore, TurnEngine, UsageCounterStore, UsageGovernor,
};
use crate::{build_router, AppState};

/// Storage and provider backends the service runs against.
pub struct Backends {
    pub store: Arc<dyn SessionStore>,
    pub accounts: Arc<dyn AccountDirectory>,
    pub counters: Arc<dyn UsageCounterStore>,
    pub providers: ProviderSet,
}

impl Backends {
    /// Process-local backends. Unknown accounts are provisioned on first
    /// sight as active free-tier users.
    pub fn in_memory(providers: ProviderSet) -> Self {
        Self {
            store: Arc::new(InMemorySessionStore::new()),
            accounts: Arc::new(InMemoryAccountDirectory::auto_provisioning()),
            counters: Arc::new(InMemoryUsageStore::new()),
            providers,
        }
    }

    pub async fn mongo(
        config: &BrainstormConfig,
        uri: &str,
        database: &str,
    ) -> Result<Self, AppError> {
        let db = BrainstormDb::connect(uri, database).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            e
        })?;
        db.initialize_indexes().await.map_err(|e| {
            tracing::error!("Failed to initialize database indexes: {}", e);
            e
        })?;

        Ok(Self {
            store: Arc::new(MongoSessionStore::new(db.clone())),
            accounts: Arc::new(MongoAccountDirectory::new(db.clone())),
            counters: Arc::new(MongoUsageStore::new(db)),
            providers: providers_from_config(config),
        })
    }
}

fn provider_from_config(label: &str, config: &ProviderConfig) -> Arc<dyn CompletionProvider> {
    match &config.endpoint {
        Some(endpoint) => {
            tracing::info!(participant = label, endpoint = %endpoint, "Using HTTP completion provider");
            Arc::new(HttpCompletionProvider::new(
                endpoint.clone(),
                config.api_key.clone(),
            ))
        }
        None => {
            tracing::warn!(participant = label, "No endpoint configured, using mock provider");
            Arc::new(MockCompletionProvider::new(label))
        }
    }
}

pub fn providers_from_config(config: &BrainstormConfig) -> ProviderSet {
    ProviderSet {
        claude: provider_from_config("Claude", &config.participants.claude),
        grok: provider_from_config("Grok", &config.participants.grok),
    }
}

/// Wire the engine, gateway and limiters around the given backends.
pub fn build_state(
    config: BrainstormConfig,
    jwt: JwtService,
    backends: Backends,
) -> AppState {
    let gateway = Arc::new(Gateway::new(config.realtime.send_queue));
    let governor = UsageGovernor::new(backends.counters, config.usage.clone());
    let broadcaster: Arc<dyn RoomBroadcaster> = gateway.clone();

    let engine = Arc::new(TurnEngine::new(
        backends.store.clone(),
        governor.clone(),
        backends.providers,
        broadcaster,
        config.turns.clone(),
        config.participants.clone(),
    ));

    let relay_limiter = create_keyed_rate_limiter(config.realtime.relay_per_minute, 60);
    let ip_rate_limiter = create_ip_rate_limiter(
        config.security.global_ip_limit,
        config.security.global_ip_window_seconds,
    );

    AppState {
        config,
        engine,
        store: backends.store,
        accounts: backends.accounts,
        governor,
        gateway,
        jwt,
        relay_limiter,
        ip_rate_limiter,
    }
}

pub struct Application {
    port: u16,
    server: Box<dyn Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    pub async fn build(config: BrainstormConfig) -> Result<Self, AppError> {
        let jwt = JwtService::new(&config.jwt).map_err(|e| {
            tracing::error!("Failed to initialize JWT verification: {}", e);
            AppError::ConfigError(e)
        })?;

        let backends = match &config.mongodb {
            Some(mongo) => Backends::mongo(&config, &mongo.uri, &mongo.database).await?,
            None => {
                tracing::warn!("MONGODB_URI not set, sessions are kept in memory");
                Backends::in_memory(providers_from_config(&config))
            }
        };

        let state = build_state(config.clone(), jwt, backends);
        let app = build_router(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal());

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
