use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::ProductType;

/// Breakdown of `total_charges` (spec §3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChargeBreakdown {
    pub brokerage: Decimal,
    pub stt: Decimal,
    pub exchange_charges: Decimal,
    pub gst: Decimal,
    pub sebi_charges: Decimal,
    pub stamp_duty: Decimal,
}

impl ChargeBreakdown {
    pub fn total(&self) -> Decimal {
        self.brokerage + self.stt + self.exchange_charges + self.gst + self.sebi_charges + self.stamp_duty
    }
}

/// Aggregate exposure per (account, symbol, exchange, product, trading_day).
///
/// Open Question (b): the source declares `symbol` twice on one model; this
/// is treated as a bug, so there is a single `symbol` field here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub trading_account_id: i64,
    pub symbol: String,
    pub exchange: String,
    pub product_type: ProductType,
    pub trading_day: NaiveDate,
    pub net_quantity: i64,
    pub is_overnight: bool,
    pub buy_quantity: i64,
    pub buy_value: Decimal,
    pub buy_price: Decimal,
    pub sell_quantity: i64,
    pub sell_value: Decimal,
    pub sell_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_pnl: Decimal,
    pub charges: ChargeBreakdown,
    pub total_charges: Decimal,
    pub net_pnl: Decimal,
    pub last_price: Option<Decimal>,
    pub close_price: Option<Decimal>,
    pub is_open: bool,
    pub instrument_token: Option<i64>,
    pub strategy_id: Option<i64>,
    pub execution_id: Option<String>,
    pub entry_execution_id: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn net_quantity_invariant_holds(&self) -> bool {
        self.net_quantity == self.buy_quantity - self.sell_quantity
    }

    pub fn is_open_invariant_holds(&self) -> bool {
        self.is_open == (self.net_quantity != 0)
    }

    pub fn net_pnl_invariant_holds(&self) -> bool {
        self.net_pnl == self.realized_pnl + self.unrealized_pnl - self.total_charges
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionTransfer {
    pub id: i64,
    pub position_id: i64,
    pub from_execution_id: Option<String>,
    pub to_execution_id: Option<String>,
    pub quantity: i64,
    pub transferred_at: DateTime<Utc>,
}
