use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerTransactionType {
    Reserve,
    Allocate,
    Release,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    Pending,
    Committed,
    Failed,
    Reconciling,
}

impl LedgerStatus {
    pub fn can_transition_to(self, next: LedgerStatus) -> bool {
        matches!(
            (self, next),
            (LedgerStatus::Pending, LedgerStatus::Committed)
                | (LedgerStatus::Pending, LedgerStatus::Failed)
                | (LedgerStatus::Pending, LedgerStatus::Reconciling)
                | (LedgerStatus::Reconciling, LedgerStatus::Committed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalLedgerEntry {
    pub id: i64,
    pub portfolio_id: i64,
    pub transaction_type: LedgerTransactionType,
    pub status: LedgerStatus,
    pub amount: Decimal,
    pub reference_order_id: Option<i64>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `available = total - committed(reserve+allocate) + committed(release)` (spec §3).
pub fn available_capital(total: Decimal, entries: &[CapitalLedgerEntry]) -> Decimal {
    let mut reserved_allocated = Decimal::ZERO;
    let mut released = Decimal::ZERO;
    for e in entries {
        if e.status != LedgerStatus::Committed {
            continue;
        }
        match e.transaction_type {
            LedgerTransactionType::Reserve | LedgerTransactionType::Allocate => {
                reserved_allocated += e.amount
            }
            LedgerTransactionType::Release => released += e.amount,
            LedgerTransactionType::Fail => {}
        }
    }
    total - reserved_allocated + released
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(tt: LedgerTransactionType, status: LedgerStatus, amount: Decimal) -> CapitalLedgerEntry {
        CapitalLedgerEntry {
            id: 1,
            portfolio_id: 1,
            transaction_type: tt,
            status,
            amount,
            reference_order_id: None,
            reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn available_capital_ignores_non_committed_entries() {
        let entries = vec![
            entry(LedgerTransactionType::Reserve, LedgerStatus::Committed, dec!(100)),
            entry(LedgerTransactionType::Reserve, LedgerStatus::Pending, dec!(500)),
            entry(LedgerTransactionType::Release, LedgerStatus::Committed, dec!(20)),
        ];
        assert_eq!(available_capital(dec!(1000), &entries), dec!(920));
    }

    #[test]
    fn status_transitions_match_spec() {
        assert!(LedgerStatus::Pending.can_transition_to(LedgerStatus::Committed));
        assert!(LedgerStatus::Reconciling.can_transition_to(LedgerStatus::Committed));
        assert!(!LedgerStatus::Committed.can_transition_to(LedgerStatus::Pending));
    }
}
