use serde::{Deserialize, Serialize};

use super::usage::UsageTier;

/// Read-only view of an identity-layer account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub tier: UsageTier,
}

fn default_active() -> bool {
    true
}

impl Account {
    pub fn new(id: impl Into<String>, tier: UsageTier) -> Self {
        Self {
            id: id.into(),
            active: true,
            tier,
        }
    }
}
