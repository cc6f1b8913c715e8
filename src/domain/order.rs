use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    Sl,
    #[serde(rename = "SL-M")]
    SlM,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductType {
    CNC,
    MIS,
    NRML,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderVariety {
    Regular,
    Amo,
    Iceberg,
    Auction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSource {
    Manual,
    Script,
    External,
    BrokerDirect,
}

/// State machine per spec §4.1. Transitions are enforced in
/// `orders::state_machine`, never inline at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Submitted,
    Open,
    TriggerPending,
    Complete,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Complete | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::Open => "OPEN",
            OrderStatus::TriggerPending => "TRIGGER_PENDING",
            OrderStatus::Complete => "COMPLETE",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => OrderStatus::Pending,
            "SUBMITTED" => OrderStatus::Submitted,
            "OPEN" => OrderStatus::Open,
            "TRIGGER_PENDING" => OrderStatus::TriggerPending,
            "COMPLETE" => OrderStatus::Complete,
            "CANCELLED" => OrderStatus::Cancelled,
            "REJECTED" => OrderStatus::Rejected,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub broker_order_id: Option<String>,
    pub user_id: String,
    pub trading_account_id: i64,
    pub strategy_id: Option<i64>,
    pub portfolio_id: Option<i64>,
    pub execution_id: Option<String>,
    pub position_id: Option<i64>,
    pub source: OrderSource,
    pub symbol: String,
    pub exchange: String,
    pub transaction_type: TransactionType,
    pub order_type: OrderType,
    pub product_type: ProductType,
    pub variety: OrderVariety,
    pub quantity: i64,
    pub filled_quantity: i64,
    pub pending_quantity: i64,
    pub cancelled_quantity: i64,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub average_price: Option<Decimal>,
    pub validity: String,
    pub disclosed_quantity: Option<i64>,
    pub status: OrderStatus,
    pub status_message: Option<String>,
    pub broker_tag: Option<String>,
    pub risk_check_passed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub exchange_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// `filled + pending + cancelled == quantity` invariant (spec §3, §8).
    pub fn quantity_invariant_holds(&self) -> bool {
        self.filled_quantity + self.pending_quantity + self.cancelled_quantity == self.quantity
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStateHistory {
    pub id: i64,
    pub order_id: i64,
    pub old_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub changed_by_user_id: Option<String>,
    pub changed_by_system: Option<String>,
    pub reason: Option<String>,
    pub broker_response: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub changed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_match_spec() {
        assert!(OrderStatus::Complete.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            OrderStatus::Pending,
            OrderStatus::Submitted,
            OrderStatus::Open,
            OrderStatus::TriggerPending,
            OrderStatus::Complete,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
        ] {
            assert_eq!(OrderStatus::from_str(s.as_str()), Some(s));
        }
    }
}
