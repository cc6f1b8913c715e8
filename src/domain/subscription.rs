use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionSource {
    Position,
    Holding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSubscription {
    pub id: i64,
    pub instrument_token: i64,
    pub trading_account_id: i64,
    pub source: SubscriptionSource,
    pub is_active: bool,
    pub is_subscribable: bool,
    pub created_at: DateTime<Utc>,
}

/// Bonds/debt/SGB/GSEC/SDL segments stream poorly and are polled instead
/// (spec §4.9).
pub fn is_subscribable_segment(segment: &str) -> bool {
    !matches!(
        segment.to_ascii_uppercase().as_str(),
        "BOND" | "DEBT" | "SGB" | "GSEC" | "SDL"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bond_like_segments_are_not_subscribable() {
        assert!(!is_subscribable_segment("SGB"));
        assert!(!is_subscribable_segment("gsec"));
        assert!(is_subscribable_segment("EQ"));
    }
}
