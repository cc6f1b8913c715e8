//! Persistence for the `trades` ledger (spec §3), populated when
//! reconciliation detects a new fill (spec §4.6).

use anyhow::{Context, Result};
use rust_decimal::Decimal;

use crate::db::Pool;
use crate::domain::{OrderSource, ProductType, Trade, TransactionType};

#[derive(Clone)]
pub struct TradeRepo {
    db: Pool,
}

impl TradeRepo {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }

    /// Inserts the trade row for one incremental fill. `broker_trade_id`
    /// must be unique per fill; reconciliation synthesizes one from the
    /// broker order id plus the filled-quantity watermark since the broker
    /// list-orders view does not expose individual fill ids.
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &self,
        order_id: i64,
        broker_order_id: Option<&str>,
        broker_trade_id: &str,
        user_id: &str,
        trading_account_id: i64,
        strategy_id: Option<i64>,
        execution_id: Option<&str>,
        portfolio_id: Option<i64>,
        symbol: &str,
        exchange: &str,
        transaction_type: TransactionType,
        product_type: ProductType,
        quantity: i64,
        price: Decimal,
        source: OrderSource,
    ) -> Result<Trade> {
        self.db.with_conn(|conn| {
            let trade_value = Decimal::from(quantity) * price;
            let now = chrono::Utc::now();
            conn.execute(
                "INSERT OR IGNORE INTO trades (
                    order_id, broker_order_id, broker_trade_id, user_id, trading_account_id,
                    strategy_id, execution_id, portfolio_id, symbol, exchange,
                    transaction_type, product_type, quantity, price, trade_value, trade_time, source
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                rusqlite::params![
                    order_id,
                    broker_order_id,
                    broker_trade_id,
                    user_id,
                    trading_account_id,
                    strategy_id,
                    execution_id,
                    portfolio_id,
                    symbol,
                    exchange,
                    transaction_type_str(transaction_type),
                    product_type_str(product_type),
                    quantity,
                    price.to_string(),
                    trade_value.to_string(),
                    now.to_rfc3339(),
                    source_str(source),
                ],
            )
            .context("failed to insert trade")?;

            Ok(Trade {
                id: conn.last_insert_rowid(),
                order_id,
                broker_order_id: broker_order_id.map(str::to_string),
                broker_trade_id: broker_trade_id.to_string(),
                user_id: user_id.to_string(),
                trading_account_id,
                strategy_id,
                execution_id: execution_id.map(str::to_string),
                portfolio_id,
                symbol: symbol.to_string(),
                exchange: exchange.to_string(),
                transaction_type,
                product_type,
                quantity,
                price,
                trade_value,
                trade_time: now,
                source,
            })
        })
    }
}

fn transaction_type_str(t: TransactionType) -> &'static str {
    match t {
        TransactionType::Buy => "BUY",
        TransactionType::Sell => "SELL",
    }
}

fn product_type_str(t: ProductType) -> &'static str {
    match t {
        ProductType::CNC => "CNC",
        ProductType::MIS => "MIS",
        ProductType::NRML => "NRML",
    }
}

fn source_str(s: OrderSource) -> &'static str {
    match s {
        OrderSource::Manual => "manual",
        OrderSource::Script => "script",
        OrderSource::External => "external",
        OrderSource::BrokerDirect => "broker_direct",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn inserts_a_trade_and_computes_trade_value() {
        let db = Pool::open_in_memory().unwrap();
        let repo = TradeRepo::new(db.clone());
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO orders (id, user_id, trading_account_id, source, symbol, exchange, \
                 transaction_type, order_type, product_type, variety, quantity, filled_quantity, \
                 pending_quantity, cancelled_quantity, validity, status, risk_check_passed, created_at, updated_at) \
                 VALUES (1, 'u', 1, 'manual', 'TCS', 'NSE', 'BUY', 'LIMIT', 'CNC', 'regular', 10, 0, 10, 0, 'DAY', 'SUBMITTED', 1, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
            Ok(())
        })
        .unwrap();

        let trade = repo
            .insert(
                1,
                Some("BRK1"),
                "BRK1-10",
                "u",
                1,
                None,
                None,
                None,
                "TCS",
                "NSE",
                TransactionType::Buy,
                ProductType::CNC,
                10,
                dec!(100),
                OrderSource::Manual,
            )
            .unwrap();
        assert_eq!(trade.trade_value, dec!(1000));
    }
}
