//! Per-user daily admission budget and post-hoc token cost accounting.
//!
//! Counters are keyed by user and stamped with the UTC day they belong to.
//! The first check on a new day zeroes the stale count before comparing, so
//! no background reset job exists. Check and increment happen in one atomic
//! step per store, which keeps concurrent requests from one user (several
//! sockets, several tabs) from overshooting the ceiling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mongodb::{
    bson::doc,
    error::{ErrorKind, WriteFailure},
    options::{FindOneAndUpdateOptions, ReturnDocument},
};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::database::BrainstormDb;
use super::metrics;
use crate::config::UsageLimitsConfig;
use crate::error::BrainstormError;
use crate::models::usage::{day_key, next_reset};
use crate::models::{DailyUsage, Speaker, UsageRecord, UsageSnapshot, UsageTier};

/// USD per 1K tokens for models without a table entry.
pub const DEFAULT_RATE_PER_1K: f64 = 0.075;

const MODEL_RATES_PER_1K: &[(&str, f64)] = &[
    ("claude-3-5-sonnet", 0.009),
    ("claude-3-5-haiku", 0.0024),
    ("claude-3-opus", 0.045),
    ("claude-3-haiku", 0.00075),
    ("grok-2", 0.006),
    ("grok-beta", 0.01),
];

/// Result of an atomic check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Counted; carries the new count.
    Admitted(u64),
    /// At the ceiling; carries the current count.
    Rejected(u64),
}

#[async_trait]
pub trait UsageCounterStore: Send + Sync {
    async fn try_increment(
        &self,
        user_id: &str,
        day: &str,
        limit: Option<u64>,
    ) -> Result<Admission, BrainstormError>;

    /// Today's count, zero when the stored counter is from another day.
    async fn current(&self, user_id: &str, day: &str) -> Result<u64, BrainstormError>;

    async fn record(&self, record: &UsageRecord) -> Result<(), BrainstormError>;
}

pub struct MongoUsageStore {
    db: BrainstormDb,
}

impl MongoUsageStore {
    pub fn new(db: BrainstormDb) -> Self {
        Self { db }
    }
}

const UPSERT_ATTEMPTS: u32 = 3;

fn at_ceiling(used: u64, limit: Option<u64>) -> bool {
    limit.is_some_and(|limit| used >= limit)
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => command.code == 11000,
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == 11000,
        _ => false,
    }
}

#[async_trait]
impl UsageCounterStore for MongoUsageStore {
    async fn try_increment(
        &self,
        user_id: &str,
        day: &str,
        limit: Option<u64>,
    ) -> Result<Admission, BrainstormError> {
        let counters = self.db.daily_usage();

        let mut filter = doc! { "_id": user_id, "day": day };
        if let Some(limit) = limit {
            filter.insert("count", doc! { "$lt": limit as i64 });
        }
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        for attempt in 1..=UPSERT_ATTEMPTS {
            // Lazy reset of yesterday's counter.
            counters
                .update_one(
                    doc! { "_id": user_id, "day": { "$ne": day } },
                    doc! { "$set": { "day": day, "count": 0_i64 } },
                    None,
                )
                .await
                .map_err(|e| {
                    tracing::error!(user_id = %user_id, "Failed to reset usage counter: {}", e);
                    BrainstormError::from(e)
                })?;

            // A duplicate key means the filter missed an existing counter:
            // either it sits at the ceiling, or a concurrent first admission
            // inserted it a moment earlier.
            match counters
                .find_one_and_update(
                    filter.clone(),
                    doc! { "$inc": { "count": 1_i64 } },
                    options.clone(),
                )
                .await
            {
                Ok(Some(counter)) => return Ok(Admission::Admitted(counter.count)),
                Ok(None) => {
                    return Err(BrainstormError::Store(anyhow::anyhow!(
                        "usage counter upsert returned no document"
                    )))
                }
                Err(e) if is_duplicate_key(&e) => {
                    let used = self.current(user_id, day).await?;
                    if at_ceiling(used, limit) {
                        return Ok(Admission::Rejected(used));
                    }
                    tracing::debug!(user_id = %user_id, attempt, "Usage counter upsert raced, retrying");
                }
                Err(e) => {
                    tracing::error!(user_id = %user_id, "Failed to increment usage counter: {}", e);
                    return Err(BrainstormError::from(e));
                }
            }
        }

        Err(BrainstormError::ConcurrencyConflict(
            "Usage counter is busy, try again".to_string(),
        ))
    }

    async fn current(&self, user_id: &str, day: &str) -> Result<u64, BrainstormError> {
        let counter = self
            .db
            .daily_usage()
            .find_one(doc! { "_id": user_id }, None)
            .await
            .map_err(|e| {
                tracing::error!(user_id = %user_id, "Failed to read usage counter: {}", e);
                BrainstormError::from(e)
            })?;

        Ok(counter
            .filter(|c| c.day == day)
            .map(|c| c.count)
            .unwrap_or(0))
    }

    async fn record(&self, record: &UsageRecord) -> Result<(), BrainstormError> {
        self.db
            .usage_records()
            .insert_one(record, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to record usage: {}", e);
                BrainstormError::from(e)
            })?;
        Ok(())
    }
}

/// Counters guarded by the map's per-entry lock.
#[derive(Default, Clone)]
pub struct InMemoryUsageStore {
    counters: Arc<DashMap<String, DailyUsage>>,
    records: Arc<Mutex<Vec<UsageRecord>>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl UsageCounterStore for InMemoryUsageStore {
    async fn try_increment(
        &self,
        user_id: &str,
        day: &str,
        limit: Option<u64>,
    ) -> Result<Admission, BrainstormError> {
        let mut counter = self
            .counters
            .entry(user_id.to_string())
            .or_insert_with(|| DailyUsage {
                user_id: user_id.to_string(),
                day: day.to_string(),
                count: 0,
            });

        if counter.day != day {
            counter.day = day.to_string();
            counter.count = 0;
        }

        match limit {
            Some(limit) if counter.count >= limit => Ok(Admission::Rejected(counter.count)),
            _ => {
                counter.count += 1;
                Ok(Admission::Admitted(counter.count))
            }
        }
    }

    async fn current(&self, user_id: &str, day: &str) -> Result<u64, BrainstormError> {
        Ok(self
            .counters
            .get(user_id)
            .filter(|c| c.day == day)
            .map(|c| c.count)
            .unwrap_or(0))
    }

    async fn record(&self, record: &UsageRecord) -> Result<(), BrainstormError> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

pub fn estimate_cost(model: &str, tokens: u64) -> f64 {
    let rate = MODEL_RATES_PER_1K
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, rate)| *rate)
        .unwrap_or(DEFAULT_RATE_PER_1K);
    (tokens as f64 / 1000.0) * rate
}

#[derive(Clone)]
pub struct UsageGovernor {
    counters: Arc<dyn UsageCounterStore>,
    limits: UsageLimitsConfig,
}

impl UsageGovernor {
    pub fn new(counters: Arc<dyn UsageCounterStore>, limits: UsageLimitsConfig) -> Self {
        Self { counters, limits }
    }

    /// Count one admission against today's budget, or refuse it.
    pub async fn admit(
        &self,
        user_id: &str,
        tier: UsageTier,
        now: DateTime<Utc>,
    ) -> Result<UsageSnapshot, BrainstormError> {
        let limit = self.limits.limit_for(tier);
        let reset_at = next_reset(now);

        match self
            .counters
            .try_increment(user_id, &day_key(now), limit)
            .await?
        {
            Admission::Admitted(used) => Ok(UsageSnapshot {
                tier,
                limit,
                used,
                reset_at,
            }),
            Admission::Rejected(used) => {
                metrics::record_usage_rejection(tier.as_str());
                tracing::info!(
                    user_id = %user_id,
                    tier = tier.as_str(),
                    used,
                    "Daily usage limit reached"
                );
                Err(BrainstormError::UsageLimitExceeded {
                    limit: limit.unwrap_or(used),
                    used,
                    reset_at,
                })
            }
        }
    }

    pub async fn snapshot(
        &self,
        user_id: &str,
        tier: UsageTier,
        now: DateTime<Utc>,
    ) -> Result<UsageSnapshot, BrainstormError> {
        Ok(UsageSnapshot {
            tier,
            limit: self.limits.limit_for(tier),
            used: self.counters.current(user_id, &day_key(now)).await?,
            reset_at: next_reset(now),
        })
    }

    /// Price a completed provider call. Never fails the caller.
    pub async fn record_usage(
        &self,
        session_id: &str,
        user_id: &str,
        speaker: Speaker,
        model: &str,
        tokens: u64,
    ) {
        let record = UsageRecord {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            speaker,
            model: model.to_string(),
            tokens,
            cost: estimate_cost(model, tokens),
            timestamp: Utc::now(),
        };

        if let Err(e) = self.counters.record(&record).await {
            tracing::warn!(
                session_id = %session_id,
                model = %model,
                error = %e,
                "Failed to record token usage, continuing"
            );
        }
    }
}
