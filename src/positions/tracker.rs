//! Trade-driven position updates (spec §4.4): upsert on fill, weighted
//! averages, brokerage, realized/unrealized P&L, intraday/overnight split,
//! and the open→closed transition.

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::domain::{Position, ProductType, Trade, TransactionType};

use super::brokerage::{calculate_position_charges, InstrumentType};
use super::pnl::{realized_pnl, total_pnl as total_pnl_fn, unrealized_pnl, weighted_average_price};
use super::repo::PositionRepo;

#[derive(Clone)]
pub struct PositionTracker {
    repo: PositionRepo,
}

/// Side-effect signal for the caller: a position opened or closed on this
/// fill, which should trigger Subscribe/Unsubscribe (spec §4.4, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEvent {
    None,
    Opened,
    Closed,
}

impl PositionTracker {
    pub fn new(repo: PositionRepo) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &PositionRepo {
        &self.repo
    }

    /// Applies one trade fill to its position, creating the position row on
    /// first fill. Returns the updated position plus a subscription
    /// transition hint.
    pub fn apply_fill(&self, trade: &Trade, instrument_token: Option<i64>) -> Result<(Position, SubscriptionEvent)> {
        // Per §9's timezone design note, only the daily-quota reset boundary
        // uses the policy timezone; trading_day here is plain UTC.
        let trading_day = Utc::now().date_naive();

        let existing = self.repo.find(
            trade.trading_account_id,
            &trade.symbol,
            &trade.exchange,
            trade.product_type,
            trading_day,
        )?;

        let was_open = existing.as_ref().map(|p| p.is_open).unwrap_or(false);

        let mut position = match existing {
            Some(p) => p,
            None => {
                let id = self.repo.insert(
                    trade.trading_account_id,
                    &trade.symbol,
                    &trade.exchange,
                    trade.product_type,
                    trading_day,
                    instrument_token,
                    trade.strategy_id,
                    trade.execution_id.as_deref(),
                )?;
                self.repo.get(id)?.expect("position just inserted")
            }
        };

        match trade.transaction_type {
            TransactionType::Buy => {
                let new_price = weighted_average_price(
                    position.buy_quantity,
                    position.buy_value,
                    trade.quantity,
                    trade.price,
                );
                position.buy_quantity += trade.quantity;
                position.buy_value += Decimal::from(trade.quantity) * trade.price;
                position.buy_price = new_price;
            }
            TransactionType::Sell => {
                let new_price = weighted_average_price(
                    position.sell_quantity,
                    position.sell_value,
                    trade.quantity,
                    trade.price,
                );
                position.sell_quantity += trade.quantity;
                position.sell_value += Decimal::from(trade.quantity) * trade.price;
                position.sell_price = new_price;
            }
        }

        position.net_quantity = position.buy_quantity - position.sell_quantity;
        position.is_overnight = !matches!(trade.product_type, ProductType::MIS);

        position.realized_pnl = realized_pnl(
            position.buy_quantity,
            position.buy_price,
            position.sell_quantity,
            position.sell_price,
        );

        let mark = position.last_price.unwrap_or(trade.price);
        position.unrealized_pnl = unrealized_pnl(
            position.net_quantity,
            position.buy_price,
            position.sell_price,
            mark,
        );
        position.total_pnl = total_pnl_fn(position.realized_pnl, position.unrealized_pnl);

        position.charges = calculate_position_charges(
            &trade.exchange,
            trade.product_type,
            position.buy_quantity,
            position.buy_value,
            position.sell_quantity,
            position.sell_value,
            InstrumentType::Equity,
        );
        position.total_charges = position.charges.total();
        position.net_pnl = position.total_pnl - position.total_charges;

        let now_open = position.net_quantity != 0;
        position.is_open = now_open;
        if !now_open && was_open {
            position.closed_at = Some(Utc::now());
            position.close_price = Some(trade.price);
        }
        position.updated_at = Utc::now();

        self.repo.save(&position)?;

        let event = match (was_open, now_open) {
            (false, true) => SubscriptionEvent::Opened,
            (true, false) => SubscriptionEvent::Closed,
            _ => SubscriptionEvent::None,
        };

        Ok((position, event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Pool;
    use crate::domain::OrderSource;
    use rust_decimal_macros::dec;

    fn trade(transaction_type: TransactionType, quantity: i64, price: Decimal) -> Trade {
        Trade {
            id: 1,
            order_id: 1,
            broker_order_id: None,
            broker_trade_id: format!("t-{transaction_type:?}-{quantity}-{price}"),
            user_id: "u1".into(),
            trading_account_id: 1,
            strategy_id: None,
            execution_id: None,
            portfolio_id: None,
            symbol: "RELIANCE".into(),
            exchange: "NSE".into(),
            transaction_type,
            product_type: ProductType::CNC,
            quantity,
            price,
            trade_value: Decimal::from(quantity) * price,
            trade_time: Utc::now(),
            source: OrderSource::Manual,
        }
    }

    #[test]
    fn opening_then_closing_a_position_emits_both_subscription_events() {
        let db = Pool::open_in_memory().unwrap();
        let tracker = PositionTracker::new(PositionRepo::new(db));

        let (position, event) = tracker.apply_fill(&trade(TransactionType::Buy, 10, dec!(2500)), Some(100)).unwrap();
        assert_eq!(event, SubscriptionEvent::Opened);
        assert_eq!(position.net_quantity, 10);
        assert!(position.is_open);

        let (position, event) = tracker.apply_fill(&trade(TransactionType::Sell, 10, dec!(2600)), Some(100)).unwrap();
        assert_eq!(event, SubscriptionEvent::Closed);
        assert_eq!(position.net_quantity, 0);
        assert!(!position.is_open);
        assert!(position.realized_pnl > Decimal::ZERO);
    }

    #[test]
    fn partial_fills_blend_weighted_average_buy_price() {
        let db = Pool::open_in_memory().unwrap();
        let tracker = PositionTracker::new(PositionRepo::new(db));

        tracker.apply_fill(&trade(TransactionType::Buy, 10, dec!(100)), None).unwrap();
        let (position, _) = tracker.apply_fill(&trade(TransactionType::Buy, 10, dec!(200)), None).unwrap();

        assert_eq!(position.buy_price, dec!(150));
        assert_eq!(position.net_quantity, 20);
    }
}
