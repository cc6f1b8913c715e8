use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Activity-based classification controlling polling cadence (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncTier {
    Hot,
    Warm,
    Cold,
    Dormant,
}

impl SyncTier {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncTier::Hot => "HOT",
            SyncTier::Warm => "WARM",
            SyncTier::Cold => "COLD",
            SyncTier::Dormant => "DORMANT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "HOT" => SyncTier::Hot,
            "WARM" => SyncTier::Warm,
            "COLD" => SyncTier::Cold,
            "DORMANT" => SyncTier::Dormant,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountTier {
    pub trading_account_id: i64,
    pub tier: SyncTier,
    pub hot_expires_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
