pub mod accounts;
pub mod context;
pub mod database;
pub mod engine;
pub mod export;
pub mod jwt;
pub mod metrics;
pub mod providers;
pub mod store;
pub mod turn_lock;
pub mod usage;

pub use accounts::{AccountDirectory, InMemoryAccountDirectory, MongoAccountDirectory};
pub use database::BrainstormDb;
pub use engine::{NewSession, TurnEngine};
pub use export::{ExportFormat, Transcript};
pub use jwt::{AccessTokenClaims, JwtService};
pub use metrics::{get_metrics, init_metrics};
pub use providers::{
    http::HttpCompletionProvider, mock::MockCompletionProvider, CompletionProvider, ProviderSet,
};
pub use store::{InMemorySessionStore, MongoSessionStore, SessionStore};
pub use turn_lock::TurnLocks;
pub use usage::{InMemoryUsageStore, MongoUsageStore, UsageCounterStore, UsageGovernor};
