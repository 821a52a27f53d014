pub mod account;
pub mod message;
pub mod session;
pub mod status;
pub mod usage;

pub use account::Account;
pub use message::{Attachment, AttachmentType, Message, Speaker};
pub use session::{
    DiscussionFormat, ModerationLevel, Participant, Participants, Session, SessionSettings,
    SessionSummary,
};
pub use status::{SessionAction, SessionStatus};
pub use usage::{DailyUsage, UsageRecord, UsageSnapshot, UsageTier};
