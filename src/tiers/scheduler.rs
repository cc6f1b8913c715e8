//! Per-tier polling loops (spec §4.7): one supervised task per tier, each
//! polling its account set at the tier's interval in small batches with an
//! inter-batch pause to stay under the rate limiter.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::warn;

use crate::domain::SyncTier;
use crate::reconcile::ReconciliationWorker;

use super::classifier::TierClassifier;

pub struct TierScheduler {
    classifier: TierClassifier,
    reconcile: Arc<ReconciliationWorker>,
    batch_size: usize,
    batch_pause: Duration,
}

impl TierScheduler {
    pub fn new(classifier: TierClassifier, reconcile: Arc<ReconciliationWorker>, batch_size: usize, batch_pause: Duration) -> Self {
        Self {
            classifier,
            reconcile,
            batch_size,
            batch_pause,
        }
    }

    /// Long-lived task: polls every account in `tier` once per `interval`.
    /// DORMANT has no loop (spec §4.7) and is never passed here.
    pub async fn run_tier(self: Arc<Self>, tier: SyncTier, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.poll_tier_once(tier).await {
                warn!(?tier, %err, "tier poll pass failed");
            }
        }
    }

    async fn poll_tier_once(&self, tier: SyncTier) -> anyhow::Result<()> {
        let accounts = self.classifier.list_by_tier(tier)?;
        for batch in accounts.chunks(self.batch_size) {
            let futures = batch.iter().map(|account| {
                let reconcile = self.reconcile.clone();
                let account_id = account.trading_account_id;
                async move {
                    if let Err(err) = reconcile.poll_account(account_id).await {
                        warn!(account_id, %err, "tiered poll of account failed");
                    }
                }
            });
            join_all(futures).await;
            if !self.batch_pause.is_zero() {
                tokio::time::sleep(self.batch_pause).await;
            }
        }
        Ok(())
    }

    /// Full classifier pass: demotes expired HOT promotions and re-tiers
    /// every known account from fresh activity data supplied by the caller.
    pub fn reclassify_all(&self, activities: &[super::classifier::AccountActivity]) -> anyhow::Result<()> {
        let now = chrono::Utc::now();
        for activity in activities {
            let existing = self.classifier.get(activity.trading_account_id)?;
            let promoted_until = existing.and_then(|t| t.hot_expires_at);
            let tier = self.classifier.classify(activity, now, promoted_until);
            self.classifier.upsert(activity.trading_account_id, tier, None, activity.last_activity_at)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::test_support::{MockBroker, SingleBrokerPool};
    use crate::broker::{BrokerOrderView, BrokerPool};
    use crate::db::Pool;
    use crate::domain::{OrderSource, OrderStatus, OrderVariety, ProductType, TransactionType};
    use crate::orders::OrderRepo;
    use crate::positions::{PositionRepo, PositionTracker, TradeRepo};
    use crate::tiers::classifier::AccountActivity;
    use rust_decimal_macros::dec;

    fn seed_submitted_order(db: &Pool, trading_account_id: i64) -> i64 {
        db.with_transaction(|txn| {
            let id = OrderRepo::insert_pending(
                txn,
                "00000000-0000-0000-0000-000000000001",
                trading_account_id,
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
        .expect("seed order")
    }

    fn worker_with_drifted_fill(db: &Pool) -> Arc<ReconciliationWorker> {
        let mock = MockBroker::default();
        *mock.list_orders_result.lock() = vec![BrokerOrderView {
            broker_order_id: "BROKER-1".into(),
            status: "COMPLETE".into(),
            filled_quantity: 10,
            average_price: Some(dec!(2500)),
        }];
        let pool: Arc<dyn BrokerPool> = Arc::new(SingleBrokerPool(Arc::new(mock)));
        Arc::new(ReconciliationWorker::new(
            OrderRepo::new(db.clone()),
            TradeRepo::new(db.clone()),
            PositionTracker::new(PositionRepo::new(db.clone())),
            pool,
            24,
            100,
        ))
    }

    #[tokio::test]
    async fn poll_tier_once_reconciles_every_account_in_the_tier() {
        let db = Pool::open_in_memory().expect("in-memory schema");
        let order_id = seed_submitted_order(&db, 1);
        let reconcile = worker_with_drifted_fill(&db);

        let classifier = TierClassifier::new(db.clone());
        classifier.upsert(1, SyncTier::Hot, None, Some(chrono::Utc::now())).unwrap();

        let scheduler = TierScheduler::new(classifier, reconcile, 10, Duration::from_secs(0));
        scheduler.poll_tier_once(SyncTier::Hot).await.expect("poll should succeed");

        let order = OrderRepo::new(db).get(order_id).unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Complete);
    }

    #[tokio::test]
    async fn poll_tier_once_is_a_no_op_for_an_empty_tier() {
        let db = Pool::open_in_memory().expect("in-memory schema");
        let reconcile = worker_with_drifted_fill(&db);
        let classifier = TierClassifier::new(db.clone());
        let scheduler = TierScheduler::new(classifier, reconcile, 10, Duration::from_secs(0));

        scheduler.poll_tier_once(SyncTier::Cold).await.expect("poll of an empty tier should succeed");
    }

    #[test]
    fn reclassify_all_upserts_every_supplied_account() {
        let db = Pool::open_in_memory().expect("in-memory schema");
        let classifier = TierClassifier::new(db.clone());
        let reconcile = worker_with_drifted_fill(&db);
        let scheduler = TierScheduler::new(classifier.clone(), reconcile, 10, Duration::from_secs(0));

        let activities = vec![AccountActivity {
            trading_account_id: 5,
            has_active_orders: true,
            has_open_positions: false,
            last_activity_at: None,
        }];
        scheduler.reclassify_all(&activities).unwrap();

        let hot = classifier.list_by_tier(SyncTier::Hot).unwrap();
        assert_eq!(hot.len(), 1);
        assert_eq!(hot[0].trading_account_id, 5);
    }
}
