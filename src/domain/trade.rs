use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{OrderSource, ProductType, TransactionType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub order_id: i64,
    pub broker_order_id: Option<String>,
    pub broker_trade_id: String,
    pub user_id: String,
    pub trading_account_id: i64,
    pub strategy_id: Option<i64>,
    pub execution_id: Option<String>,
    pub portfolio_id: Option<i64>,
    pub symbol: String,
    pub exchange: String,
    pub transaction_type: TransactionType,
    pub product_type: ProductType,
    pub quantity: i64,
    pub price: Decimal,
    pub trade_value: Decimal,
    pub trade_time: DateTime<Utc>,
    pub source: OrderSource,
}

impl Trade {
    /// `trade_value == quantity * price` invariant (spec §3).
    pub fn value_invariant_holds(&self) -> bool {
        self.trade_value == Decimal::from(self.quantity) * self.price
    }
}
