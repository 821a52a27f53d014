//! Read-only lookups against the identity layer's account records.

use async_trait::async_trait;
use dashmap::DashMap;
use mongodb::bson::doc;
use std::sync::Arc;

use super::database::BrainstormDb;
use crate::error::BrainstormError;
use crate::models::{Account, UsageTier};

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find(&self, user_id: &str) -> Result<Option<Account>, BrainstormError>;
}

pub struct MongoAccountDirectory {
    db: BrainstormDb,
}

impl MongoAccountDirectory {
    pub fn new(db: BrainstormDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccountDirectory for MongoAccountDirectory {
    async fn find(&self, user_id: &str) -> Result<Option<Account>, BrainstormError> {
        self.db
            .users()
            .find_one(doc! { "_id": user_id }, None)
            .await
            .map_err(|e| {
                tracing::error!(user_id = %user_id, "Failed to look up account: {}", e);
                BrainstormError::from(e)
            })
    }
}

/// In-memory directory. With `auto_provision`, unknown users resolve to an
/// active free-tier account, which is what local development wants.
#[derive(Default, Clone)]
pub struct InMemoryAccountDirectory {
    accounts: Arc<DashMap<String, Account>>,
    auto_provision: bool,
}

impl InMemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_provisioning() -> Self {
        Self {
            accounts: Arc::default(),
            auto_provision: true,
        }
    }

    pub fn upsert(&self, account: Account) {
        self.accounts.insert(account.id.clone(), account);
    }

    pub fn set_active(&self, user_id: &str, active: bool) {
        if let Some(mut account) = self.accounts.get_mut(user_id) {
            account.active = active;
        }
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn find(&self, user_id: &str) -> Result<Option<Account>, BrainstormError> {
        if let Some(account) = self.accounts.get(user_id) {
            return Ok(Some(account.value().clone()));
        }
        if self.auto_provision {
            return Ok(Some(Account::new(user_id, UsageTier::Free)));
        }
        Ok(None)
    }
}
