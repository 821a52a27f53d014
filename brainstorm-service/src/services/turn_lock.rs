//! Per-session serialization of turns.
//!
//! A turn holds its session's lock from before the load until after the
//! save, across the provider call. The guard releases on every exit path
//! (return, `?`, timeout, unwinding) and prunes the table entry once nobody
//! else references it.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::BrainstormError;

#[derive(Clone, Default)]
pub struct TurnLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

pub struct TurnGuard {
    guard: Option<OwnedMutexGuard<()>>,
    session_id: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl TurnLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait at most `timeout` for the session's lock.
    pub async fn acquire(
        &self,
        session_id: &str,
        timeout: Duration,
    ) -> Result<TurnGuard, BrainstormError> {
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_default()
            .value()
            .clone();

        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(TurnGuard {
                guard: Some(guard),
                session_id: session_id.to_string(),
                locks: self.locks.clone(),
            }),
            Err(_) => {
                prune(&self.locks, session_id);
                tracing::warn!(
                    session_id = %session_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for session lock"
                );
                Err(BrainstormError::ConcurrencyConflict(format!(
                    "another turn is in progress for session {}",
                    session_id
                )))
            }
        }
    }

    /// Number of sessions with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

fn prune(locks: &DashMap<String, Arc<Mutex<()>>>, session_id: &str) {
    locks.remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        prune(&self.locks, &self.session_id);
    }
}
