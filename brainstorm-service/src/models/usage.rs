//! Daily admission counters and the post-hoc token cost ledger.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::message::Speaker;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageTier {
    #[default]
    Free,
    Pro,
    Business,
}

impl UsageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageTier::Free => "free",
            UsageTier::Pro => "pro",
            UsageTier::Business => "business",
        }
    }
}

/// Per-user counter for one UTC calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    #[serde(rename = "_id")]
    pub user_id: String,
    /// `YYYY-MM-DD`, UTC.
    pub day: String,
    pub count: u64,
}

/// Key used to tell whether a stored counter belongs to today.
pub fn day_key(now: DateTime<Utc>) -> String {
    now.date_naive().format("%Y-%m-%d").to_string()
}

/// The next UTC midnight strictly after `now`.
pub fn next_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow: NaiveDate = now.date_naive() + Duration::days(1);
    tomorrow
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now + Duration::days(1))
}

/// What the governor reports after a check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub tier: UsageTier,
    /// `None` for unlimited tiers.
    pub limit: Option<u64>,
    pub used: u64,
    pub reset_at: DateTime<Utc>,
}

/// One priced provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub session_id: String,
    pub user_id: String,
    pub speaker: Speaker,
    pub model: String,
    pub tokens: u64,
    /// Estimated cost in USD.
    pub cost: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reset_is_next_utc_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 2, 28, 23, 59, 30).unwrap();
        assert_eq!(
            next_reset(now),
            Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()
        );

        let midnight = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(
            next_reset(midnight),
            Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn day_key_is_utc_date() {
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 22, 0, 0).unwrap();
        assert_eq!(day_key(now), "2024-12-31");
    }
}
