use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GttType {
    Single,
    TwoLeg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GttStatus {
    Active,
    Triggered,
    Cancelled,
    Expired,
    Deleted,
}

impl GttStatus {
    pub fn is_modifiable(self) -> bool {
        matches!(self, GttStatus::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GttOrderLeg {
    pub transaction_type: crate::domain::TransactionType,
    pub quantity: i64,
    pub order_type: crate::domain::OrderType,
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GttOrder {
    pub id: i64,
    pub broker_gtt_id: Option<String>,
    pub trading_account_id: i64,
    pub gtt_type: GttType,
    pub symbol: String,
    pub exchange: String,
    pub trigger_prices: Vec<Decimal>,
    pub last_price: Decimal,
    pub orders: Vec<GttOrderLeg>,
    pub status: GttStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GttOrder {
    /// single ⇒ exactly one trigger price; two-leg ⇒ exactly two (spec §3).
    pub fn trigger_price_count_valid(&self) -> bool {
        match self.gtt_type {
            GttType::Single => self.trigger_prices.len() == 1,
            GttType::TwoLeg => self.trigger_prices.len() == 2,
        }
    }

    pub fn has_follow_on_order(&self) -> bool {
        !self.orders.is_empty()
    }
}
