pub mod auth;
pub mod metrics;

pub use auth::{auth_middleware, authenticate, bearer_token, AuthUser};
pub use metrics::metrics_middleware;
