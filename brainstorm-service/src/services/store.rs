//! Durable storage for session aggregates.
//!
//! Every operation is scoped by the owning user. A session owned by someone
//! else is reported exactly like a missing one. Saves are compare-and-swap on
//! `version`, so a writer holding a stale copy gets a conflict instead of
//! silently overwriting a newer transcript.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::TryStreamExt;
use mongodb::{bson::doc, options::FindOptions};
use std::sync::Arc;

use super::database::BrainstormDb;
use crate::error::BrainstormError;
use crate::models::{Session, SessionSummary};

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<(), BrainstormError>;

    async fn load(&self, id: &str, owner: &str) -> Result<Session, BrainstormError>;

    /// Persist `session` if nobody saved since it was loaded. On success
    /// `session.version` is advanced to the stored value.
    async fn save(&self, session: &mut Session) -> Result<(), BrainstormError>;

    async fn delete(&self, id: &str, owner: &str) -> Result<(), BrainstormError>;

    /// Newest first.
    async fn list(&self, owner: &str) -> Result<Vec<SessionSummary>, BrainstormError>;

    async fn health_check(&self) -> Result<(), BrainstormError>;
}

fn stale_write(id: &str) -> BrainstormError {
    BrainstormError::ConcurrencyConflict(format!(
        "session {} was modified concurrently, reload and retry",
        id
    ))
}

pub struct MongoSessionStore {
    db: BrainstormDb,
}

impl MongoSessionStore {
    pub fn new(db: BrainstormDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for MongoSessionStore {
    async fn insert(&self, session: &Session) -> Result<(), BrainstormError> {
        self.db
            .sessions()
            .insert_one(session, None)
            .await
            .map_err(|e| {
                tracing::error!(session_id = %session.id, "Failed to insert session: {}", e);
                BrainstormError::from(e)
            })?;
        Ok(())
    }

    async fn load(&self, id: &str, owner: &str) -> Result<Session, BrainstormError> {
        self.db
            .sessions()
            .find_one(doc! { "_id": id, "userId": owner }, None)
            .await
            .map_err(|e| {
                tracing::error!(session_id = %id, "Failed to load session: {}", e);
                BrainstormError::from(e)
            })?
            .ok_or(BrainstormError::NotFound)
    }

    async fn save(&self, session: &mut Session) -> Result<(), BrainstormError> {
        let expected = session.version;
        session.version = expected + 1;

        let result = self
            .db
            .sessions()
            .replace_one(
                doc! {
                    "_id": &session.id,
                    "userId": &session.user_id,
                    "version": expected as i64,
                },
                &*session,
                None,
            )
            .await;

        match result {
            Ok(outcome) if outcome.matched_count == 1 => Ok(()),
            Ok(_) => {
                session.version = expected;
                tracing::warn!(
                    session_id = %session.id,
                    expected_version = expected,
                    "Rejected stale session save"
                );
                Err(stale_write(&session.id))
            }
            Err(e) => {
                session.version = expected;
                tracing::error!(session_id = %session.id, "Failed to save session: {}", e);
                Err(BrainstormError::from(e))
            }
        }
    }

    async fn delete(&self, id: &str, owner: &str) -> Result<(), BrainstormError> {
        let result = self
            .db
            .sessions()
            .delete_one(doc! { "_id": id, "userId": owner }, None)
            .await
            .map_err(|e| {
                tracing::error!(session_id = %id, "Failed to delete session: {}", e);
                BrainstormError::from(e)
            })?;

        if result.deleted_count == 0 {
            return Err(BrainstormError::NotFound);
        }
        Ok(())
    }

    async fn list(&self, owner: &str) -> Result<Vec<SessionSummary>, BrainstormError> {
        let options = FindOptions::builder()
            .sort(doc! { "createdAt": -1 })
            .build();

        let cursor = self
            .db
            .sessions()
            .find(doc! { "userId": owner }, options)
            .await
            .map_err(|e| {
                tracing::error!("Failed to query sessions: {}", e);
                BrainstormError::from(e)
            })?;

        let sessions: Vec<Session> = cursor.try_collect().await.map_err(|e| {
            tracing::error!("Failed to collect sessions: {}", e);
            BrainstormError::from(e)
        })?;

        Ok(sessions.iter().map(Session::summary).collect())
    }

    async fn health_check(&self) -> Result<(), BrainstormError> {
        self.db.health_check().await.map_err(BrainstormError::from)
    }
}

/// Process-local store for tests and local development.
#[derive(Default, Clone)]
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: &Session) -> Result<(), BrainstormError> {
        if self.sessions.contains_key(&session.id) {
            return Err(BrainstormError::Store(anyhow::anyhow!(
                "duplicate session id {}",
                session.id
            )));
        }
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn load(&self, id: &str, owner: &str) -> Result<Session, BrainstormError> {
        self.sessions
            .get(id)
            .filter(|s| s.user_id == owner)
            .map(|s| s.value().clone())
            .ok_or(BrainstormError::NotFound)
    }

    async fn save(&self, session: &mut Session) -> Result<(), BrainstormError> {
        let mut stored = match self.sessions.get_mut(&session.id) {
            Some(stored) if stored.user_id == session.user_id => stored,
            _ => return Err(stale_write(&session.id)),
        };

        if stored.version != session.version {
            return Err(stale_write(&session.id));
        }

        session.version += 1;
        *stored = session.clone();
        Ok(())
    }

    async fn delete(&self, id: &str, owner: &str) -> Result<(), BrainstormError> {
        self.sessions
            .remove_if(id, |_, s| s.user_id == owner)
            .map(|_| ())
            .ok_or(BrainstormError::NotFound)
    }

    async fn list(&self, owner: &str) -> Result<Vec<SessionSummary>, BrainstormError> {
        let mut sessions: Vec<SessionSummary> = self
            .sessions
            .iter()
            .filter(|entry| entry.user_id == owner)
            .map(|entry| entry.summary())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn health_check(&self) -> Result<(), BrainstormError> {
        Ok(())
    }
}
