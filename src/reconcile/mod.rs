//! Reconciliation engine (spec §4.6): the only component allowed to
//! transition non-terminal orders based on external (broker) truth.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use metrics::counter;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::audit::{Actor, AuditLog};
use crate::broker::BrokerPool;
use crate::domain::{Order, OrderSource, OrderStatus};
use crate::orders::OrderRepo;
use crate::positions::{PositionTracker, TradeRepo};

#[derive(Clone)]
pub struct ReconciliationWorker {
    repo: OrderRepo,
    trades: TradeRepo,
    tracker: PositionTracker,
    brokers: Arc<dyn BrokerPool>,
    max_age_hours: i64,
    batch_size: i64,
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct ReconciliationStats {
    pub checked: u64,
    pub drift: u64,
    pub corrected: u64,
    pub errors: u64,
}

impl ReconciliationWorker {
    pub fn new(
        repo: OrderRepo,
        trades: TradeRepo,
        tracker: PositionTracker,
        brokers: Arc<dyn BrokerPool>,
        max_age_hours: i64,
        batch_size: i64,
    ) -> Self {
        Self {
            repo,
            trades,
            tracker,
            brokers,
            max_age_hours,
            batch_size,
        }
    }

    /// Long-lived supervised task: runs `run_once` every `interval`.
    pub async fn run(self, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                warn!(%err, "reconciliation pass failed");
            }
        }
    }

    /// Polls a single account (spec §4.7's tiered scheduler calls this
    /// instead of a full `run_once` pass, one interval per tier).
    pub async fn poll_account(&self, trading_account_id: i64) -> Result<ReconciliationStats> {
        let candidates: Vec<Order> = self
            .repo
            .list_non_terminal_for_reconciliation(self.max_age_hours, self.batch_size)?
            .into_iter()
            .filter(|o| o.trading_account_id == trading_account_id)
            .collect();
        self.reconcile_account(trading_account_id, &candidates).await
    }

    /// One pass: select candidates, group by account, diff against one
    /// `list_orders` call per account, correct drift.
    pub async fn run_once(&self) -> Result<ReconciliationStats> {
        let candidates = self.repo.list_non_terminal_for_reconciliation(self.max_age_hours, self.batch_size)?;
        let mut by_account: HashMap<i64, Vec<Order>> = HashMap::new();
        for order in candidates {
            by_account.entry(order.trading_account_id).or_default().push(order);
        }

        let mut stats = ReconciliationStats::default();
        for (trading_account_id, orders) in by_account {
            match self.reconcile_account(trading_account_id, &orders).await {
                Ok(account_stats) => {
                    stats.checked += account_stats.checked;
                    stats.drift += account_stats.drift;
                    stats.corrected += account_stats.corrected;
                }
                Err(err) => {
                    stats.errors += 1;
                    warn!(trading_account_id, %err, "reconciliation failed for account");
                }
            }
        }

        counter!("reconciliation_checked_total", stats.checked);
        counter!("reconciliation_drift_total", stats.drift);
        counter!("reconciliation_corrected_total", stats.corrected);
        counter!("reconciliation_errors_total", stats.errors);
        info!(?stats, "reconciliation pass complete");
        Ok(stats)
    }

    async fn reconcile_account(&self, trading_account_id: i64, local_orders: &[Order]) -> Result<ReconciliationStats> {
        let broker = self.brokers.get(trading_account_id);
        let broker_views = broker.list_orders().await?;
        let by_broker_id: HashMap<&str, _> = broker_views
            .iter()
            .map(|v| (v.broker_order_id.as_str(), v))
            .collect();

        let mut stats = ReconciliationStats { checked: local_orders.len() as u64, ..Default::default() };

        for order in local_orders {
            let Some(broker_order_id) = order.broker_order_id.as_deref() else { continue };
            let Some(view) = by_broker_id.get(broker_order_id) else { continue };
            let Some(broker_status) = OrderStatus::from_str(&view.status) else { continue };

            let drifted = broker_status != order.status
                || view.filled_quantity != order.filled_quantity
                || view.average_price != order.average_price;
            if !drifted {
                continue;
            }
            stats.drift += 1;

            let new_filled = view.filled_quantity;
            let fill_delta = new_filled - order.filled_quantity;

            self.repo.db().with_transaction(|txn| {
                OrderRepo::apply_reconciliation_update(
                    txn,
                    order.id,
                    broker_status,
                    Some(view.filled_quantity),
                    view.average_price,
                )?;
                AuditLog::record_in_txn(
                    txn,
                    order.id,
                    Some(order.status),
                    broker_status,
                    Actor::System("reconciliation_worker"),
                    Some(&format!(
                        "drift: local={:?} broker={} filled {}->{}",
                        order.status, view.status, order.filled_quantity, new_filled
                    )),
                )?;
                Ok(())
            })?;

            if fill_delta > 0 {
                if let Some(fill_price) = view.average_price.or(order.price) {
                    self.record_fill(order, fill_delta, fill_price)?;
                }
            }

            stats.corrected += 1;
        }

        Ok(stats)
    }

    fn record_fill(&self, order: &Order, fill_delta: i64, fill_price: Decimal) -> Result<()> {
        let broker_trade_id = format!("{}-{}", order.broker_order_id.as_deref().unwrap_or("?"), order.filled_quantity + fill_delta);
        let trade = self.trades.insert(
            order.id,
            order.broker_order_id.as_deref(),
            &broker_trade_id,
            &order.user_id,
            order.trading_account_id,
            order.strategy_id,
            order.execution_id.as_deref(),
            order.portfolio_id,
            &order.symbol,
            &order.exchange,
            order.transaction_type,
            order.product_type,
            fill_delta,
            fill_price,
            OrderSource::BrokerDirect,
        )?;
        self.tracker.apply_fill(&trade, None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::test_support::{MockBroker, SingleBrokerPool};
    use crate::broker::BrokerOrderView;
    use crate::db::Pool;
    use crate::domain::{OrderVariety, ProductType, TransactionType};
    use crate::positions::PositionRepo;
    use rust_decimal_macros::dec;

    #[test]
    fn stats_default_to_zero() {
        let stats = ReconciliationStats::default();
        assert_eq!(stats.checked, 0);
        assert_eq!(stats.errors, 0);
    }

    fn worker_with_submitted_order(db: &Pool, mock: MockBroker) -> (ReconciliationWorker, i64) {
        let order_id = db
            .with_transaction(|txn| {
                let id = OrderRepo::insert_pending(
                    txn,
                    "00000000-0000-0000-0000-000000000001",
                    1,
                    None,
                    None,
                    None,
                    OrderSource::Manual,
                    "RELIANCE",
                    "NSE",
                    TransactionType::Buy,
                    crate::domain::OrderType::Limit,
                    ProductType::CNC,
                    OrderVariety::Regular,
                    10,
                    Some(dec!(2500)),
                    None,
                    None,
                    "DAY",
                    None,
                    None,
                )?;
                OrderRepo::mark_submitted(txn, id, "BROKER-1")?;
                Ok(id)
            })
            .expect("seed order");

        let pool: Arc<dyn BrokerPool> = Arc::new(SingleBrokerPool(Arc::new(mock)));
        let worker = ReconciliationWorker::new(
            OrderRepo::new(db.clone()),
            TradeRepo::new(db.clone()),
            PositionTracker::new(PositionRepo::new(db.clone())),
            pool,
            24,
            100,
        );
        (worker, order_id)
    }

    #[tokio::test]
    async fn corrects_drift_when_the_broker_reports_a_fill() {
        let db = Pool::open_in_memory().expect("in-memory schema");
        let mock = MockBroker::default();
        *mock.list_orders_result.lock() = vec![BrokerOrderView {
            broker_order_id: "BROKER-1".into(),
            status: "COMPLETE".into(),
            filled_quantity: 10,
            average_price: Some(dec!(2500)),
        }];
        let (worker, order_id) = worker_with_submitted_order(&db, mock);

        let stats = worker.poll_account(1).await.expect("reconciliation pass");
        assert_eq!(stats.checked, 1);
        assert_eq!(stats.drift, 1);
        assert_eq!(stats.corrected, 1);

        let order = OrderRepo::new(db.clone()).get(order_id).unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Complete);
        assert_eq!(order.filled_quantity, 10);
    }

    #[tokio::test]
    async fn leaves_orders_untouched_when_the_broker_agrees() {
        let db = Pool::open_in_memory().expect("in-memory schema");
        let mock = MockBroker::default();
        *mock.list_orders_result.lock() = vec![BrokerOrderView {
            broker_order_id: "BROKER-1".into(),
            status: "SUBMITTED".into(),
            filled_quantity: 0,
            average_price: None,
        }];
        let (worker, _order_id) = worker_with_submitted_order(&db, mock);

        let stats = worker.poll_account(1).await.expect("reconciliation pass");
        assert_eq!(stats.checked, 1);
        assert_eq!(stats.drift, 0);
        assert_eq!(stats.corrected, 0);
    }

    #[tokio::test]
    async fn poll_account_ignores_other_accounts_candidates() {
        let db = Pool::open_in_memory().expect("in-memory schema");
        let mock = MockBroker::default();
        let (worker, _order_id) = worker_with_submitted_order(&db, mock);

        let stats = worker.poll_account(2).await.expect("reconciliation pass");
        assert_eq!(stats.checked, 0);
    }
}
