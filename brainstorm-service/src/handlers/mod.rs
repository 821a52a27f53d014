pub mod brainstorm;
pub mod health;
pub mod metrics;
pub mod usage;

pub use brainstorm::{
    continue_session, create_session, delete_session, export_session, get_session,
    list_sessions, pause_session, post_message, resume_session, stop_session,
};
pub use health::{health_check, readiness_check};
pub use usage::usage_today;
