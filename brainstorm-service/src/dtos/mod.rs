pub mod brainstorm;

pub use brainstorm::{
    AttachmentRequest, ExportQuery, SessionResponse, SettingsRequest, StartSessionRequest,
    UserMessageRequest,
};
