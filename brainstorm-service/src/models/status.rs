//! Session lifecycle state machine.
//!
//! ```text
//!   start ──► active ◄──resume── paused
//!               │  └────pause────►  │
//!               │                   │
//!        fail   │ stop         stop │
//!               ▼                   ▼
//!             error             completed
//! ```
//!
//! `completed` and `error` are terminal: only read, export and delete are
//! allowed once a session gets there.

use serde::{Deserialize, Serialize};

use crate::error::BrainstormError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Error,
}

/// A request to move a session between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Pause,
    Resume,
    Stop,
    Fail,
}

impl SessionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionAction::Pause => "pause",
            SessionAction::Resume => "resume",
            SessionAction::Stop => "stop",
            SessionAction::Fail => "fail",
        }
    }
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }

    /// Resolve the target state of `action`, or explain why it is illegal.
    pub fn transition(self, action: SessionAction) -> Result<SessionStatus, BrainstormError> {
        use SessionAction::*;
        use SessionStatus::*;

        match (self, action) {
            (Active, Pause) => Ok(Paused),
            (Paused, Resume) => Ok(Active),
            (Active | Paused, Stop) => Ok(Completed),
            (Active, Fail) => Ok(Error),
            (from, action) => Err(BrainstormError::InvalidState(format!(
                "cannot {} a session that is {}",
                action.as_str(),
                from.as_str()
            ))),
        }
    }

    /// Guard for anything that appends to the transcript.
    pub fn ensure_active(self, operation: &str) -> Result<(), BrainstormError> {
        if self == SessionStatus::Active {
            Ok(())
        } else {
            Err(BrainstormError::InvalidState(format!(
                "cannot {} while session is {}",
                operation,
                self.as_str()
            )))
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SessionAction::*;
    use super::SessionStatus::*;
    use super::*;

    #[test]
    fn legal_transitions() {
        assert_eq!(Active.transition(Pause).unwrap(), Paused);
        assert_eq!(Paused.transition(Resume).unwrap(), Active);
        assert_eq!(Active.transition(Stop).unwrap(), Completed);
        assert_eq!(Paused.transition(Stop).unwrap(), Completed);
        assert_eq!(Active.transition(Fail).unwrap(), Error);
    }

    #[test]
    fn illegal_transitions_are_invalid_state() {
        let illegal = [
            (Active, Resume),
            (Paused, Pause),
            (Paused, Fail),
            (Completed, Pause),
            (Completed, Resume),
            (Completed, Stop),
            (Completed, Fail),
            (Error, Pause),
            (Error, Resume),
            (Error, Stop),
            (Error, Fail),
        ];

        for (from, action) in illegal {
            let err = from.transition(action).unwrap_err();
            assert!(
                matches!(err, BrainstormError::InvalidState(_)),
                "{:?} --{:?}--> should be illegal",
                from,
                action
            );
        }
    }

    #[test]
    fn only_active_accepts_appends() {
        assert!(Active.ensure_active("continue").is_ok());
        for status in [Paused, Completed, Error] {
            assert!(status.ensure_active("continue").is_err());
        }
    }
}
