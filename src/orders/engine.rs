//! Order Engine: Place/Modify/Cancel/PlaceBatch/Get/List/Count (spec §4.1).

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;

use crate::audit::{Actor, AuditLog};
use crate::broker::{BrokerOrderRequest, BrokerPool};
use crate::config::{Config, RiskPolicy};
use crate::context::RequestContext;
use crate::db::Pool;
use crate::domain::{Order, OrderStatus, OrderType, OrderVariety};
use crate::error::{AppError, AppResult};
use crate::idempotency::{IdempotencyStore, Outcome as IdempotencyOutcome};
use crate::ratelimit::RateLimiter;
use crate::resilience::{retry_with_backoff, CircuitBreaker, RetryConfig};

use super::repo::{OrderFilter, OrderRepo};
use super::state_machine::{CANCELLABLE, MODIFIABLE};
use super::validation::{check_risk, validate_structure, PlaceOrderRequest, RiskContext, MAX_BATCH_SIZE};

pub struct OrderEngine {
    db: Pool,
    repo: OrderRepo,
    audit: AuditLog,
    rate_limiter: Arc<RateLimiter>,
    brokers: Arc<dyn BrokerPool>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
    risk: RiskPolicy,
    idempotency: Arc<IdempotencyStore>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchItemResult {
    pub index: usize,
    pub success: bool,
    pub order: Option<Order>,
    pub error: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct BatchResult {
    pub results: Vec<BatchItemResult>,
    pub rollback_performed: bool,
}

impl OrderEngine {
    pub fn new(
        config: &Config,
        db: Pool,
        rate_limiter: Arc<RateLimiter>,
        brokers: Arc<dyn BrokerPool>,
        idempotency: Arc<IdempotencyStore>,
    ) -> Self {
        Self {
            repo: OrderRepo::new(db.clone()),
            audit: AuditLog::new(db.clone()),
            db,
            rate_limiter,
            brokers,
            breaker: CircuitBreaker::new(
                "broker_api",
                config.operational.circuit_breaker_failure_threshold,
                config.operational.circuit_breaker_recovery_timeout,
            ),
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay: std::time::Duration::from_secs(1),
                max_delay: std::time::Duration::from_secs(5),
                base: 2.0,
                jitter: true,
            },
            risk: config.risk.clone(),
            idempotency,
        }
    }

    fn risk_context(&self, trading_account_id: i64, symbol: &str) -> AppResult<RiskContext> {
        self.db
            .with_conn(|conn| {
                let existing_symbol_exposure: String = conn
                    .query_row(
                        "SELECT COALESCE(SUM(buy_value), '0') FROM positions \
                         WHERE trading_account_id = ?1 AND symbol = ?2 AND is_open = 1",
                        rusqlite::params![trading_account_id, symbol],
                        |row| row.get(0),
                    )
                    .unwrap_or_else(|_| "0".to_string());
                let total_exposure: String = conn
                    .query_row(
                        "SELECT COALESCE(SUM(buy_value), '0') FROM positions \
                         WHERE trading_account_id = ?1 AND is_open = 1",
                        rusqlite::params![trading_account_id],
                        |row| row.get(0),
                    )
                    .unwrap_or_else(|_| "0".to_string());
                let realized_pnl_today: String = conn
                    .query_row(
                        "SELECT COALESCE(SUM(realized_pnl), '0') FROM positions \
                         WHERE trading_account_id = ?1 AND trading_day = date('now')",
                        rusqlite::params![trading_account_id],
                        |row| row.get(0),
                    )
                    .unwrap_or_else(|_| "0".to_string());

                Ok(RiskContext {
                    available_margin: self.risk.max_order_value,
                    existing_symbol_exposure: existing_symbol_exposure.parse().unwrap_or(Decimal::ZERO),
                    total_exposure: total_exposure.parse().unwrap_or(Decimal::ZERO),
                    realized_pnl_today: realized_pnl_today.parse().unwrap_or(Decimal::ZERO),
                })
            })
            .map_err(AppError::Internal)
    }

    /// spec §4.1 `Place`.
    pub async fn place(
        &self,
        ctx: &RequestContext,
        req: PlaceOrderRequest,
        idempotency_key: Option<String>,
    ) -> AppResult<Order> {
        validate_structure(&req)?;

        let body = serde_json::to_value(&BatchShape::Single(&req)).unwrap_or(json!({}));
        if let Some(key) = &idempotency_key {
            match self.idempotency.check(&ctx.user_id.to_string(), key, &body).await {
                IdempotencyOutcome::ReturnCached(cached) => {
                    return serde_json::from_str(&cached)
                        .map_err(|e| AppError::Internal(e.into()));
                }
                IdempotencyOutcome::Conflict => {
                    return Err(AppError::Conflict(
                        "idempotency key reused with a different request body".into(),
                    ))
                }
                IdempotencyOutcome::Unavailable => return Err(AppError::UpstreamUnavailable),
                IdempotencyOutcome::Proceed => {}
            }
        }

        let risk_ctx = self.risk_context(ctx.trading_account_id, &req.symbol)?;
        check_risk(&req, &self.risk, &risk_ctx)?;

        let variety = req.variety.unwrap_or(OrderVariety::Regular);
        let validity = req.validity.clone().unwrap_or_else(|| "DAY".to_string());

        let order_id = self
            .db
            .with_transaction(|txn| {
                let id = OrderRepo::insert_pending(
                    txn,
                    &ctx.user_id.to_string(),
                    ctx.trading_account_id,
                    req.strategy_id,
                    req.portfolio_id,
                    req.execution_id.as_deref(),
                    crate::domain::OrderSource::Manual,
                    &req.symbol,
                    &req.exchange,
                    req.transaction_type,
                    req.order_type,
                    req.product_type,
                    variety,
                    req.quantity,
                    req.price,
                    req.trigger_price,
                    req.disclosed_quantity,
                    &validity,
                    req.tag.as_deref(),
                    idempotency_key.as_deref(),
                )?;
                AuditLog::record_in_txn(txn, id, None, OrderStatus::Pending, Actor::System("order_engine"), None)?;
                Ok(id)
            })
            .map_err(AppError::Internal)?;

        self.rate_limiter.check_order_place(ctx.trading_account_id).await?;

        let broker_req = BrokerOrderRequest {
            symbol: req.symbol.clone(),
            exchange: req.exchange.clone(),
            transaction_type: req.transaction_type,
            order_type: req.order_type,
            product_type: req.product_type,
            quantity: req.quantity,
            price: req.price,
            trigger_price: req.trigger_price,
            disclosed_quantity: req.disclosed_quantity,
            validity: validity.clone(),
            tag: req.tag.clone(),
        };

        let broker = self.brokers.get(ctx.trading_account_id);
        let breaker = self.breaker.clone();
        let retry_config = self.retry;
        let submission = breaker
            .call(|| {
                let broker = broker.clone();
                let broker_req = broker_req.clone();
                async move {
                    retry_with_backoff(&retry_config, || {
                        let broker = broker.clone();
                        let broker_req = broker_req.clone();
                        async move { broker.place_order(&broker_req).await }
                    })
                    .await
                }
            })
            .await;

        let order = match submission {
            Ok(response) => {
                self.db
                    .with_transaction(|txn| {
                        OrderRepo::mark_submitted(txn, order_id, &response.broker_order_id)?;
                        AuditLog::record_in_txn(
                            txn,
                            order_id,
                            Some(OrderStatus::Pending),
                            OrderStatus::Submitted,
                            Actor::System("order_engine"),
                            None,
                        )?;
                        Ok(())
                    })
                    .map_err(AppError::Internal)?;

                self.rate_limiter.record_order_placed(ctx.trading_account_id).await?;
                self.repo.get(order_id).map_err(AppError::Internal)?.ok_or_else(|| {
                    AppError::Internal(anyhow::anyhow!("order {order_id} vanished after submission"))
                })?
            }
            Err(AppError::UpstreamUnavailable) => {
                self.db
                    .with_conn(|conn| {
                        conn.execute("DELETE FROM order_state_history WHERE order_id = ?1", rusqlite::params![order_id])?;
                        conn.execute("DELETE FROM orders WHERE id = ?1", rusqlite::params![order_id])?;
                        Ok(())
                    })
                    .map_err(AppError::Internal)?;
                return Err(AppError::UpstreamUnavailable);
            }
            Err(other) => {
                self.db
                    .with_conn(|conn| {
                        conn.execute("DELETE FROM order_state_history WHERE order_id = ?1", rusqlite::params![order_id])?;
                        conn.execute("DELETE FROM orders WHERE id = ?1", rusqlite::params![order_id])?;
                        Ok(())
                    })
                    .map_err(AppError::Internal)?;
                return Err(other);
            }
        };

        if let Some(key) = &idempotency_key {
            let _ = self.idempotency.store(&ctx.user_id.to_string(), key, &body, &order).await;
        }

        Ok(order)
    }

    /// spec §4.1 `Modify`. Broker-first: DB mutates only after broker success.
    pub async fn modify(
        &self,
        ctx: &RequestContext,
        order_id: i64,
        quantity: Option<i64>,
        price: Option<Decimal>,
        trigger_price: Option<Decimal>,
        order_type: Option<OrderType>,
    ) -> AppResult<Order> {
        let order = self.load_owned(ctx, order_id)?;
        if !MODIFIABLE.contains(&order.status) {
            return Err(AppError::Conflict(format!(
                "order {order_id} in status {:?} cannot be modified",
                order.status
            )));
        }
        let broker_order_id = order
            .broker_order_id
            .clone()
            .ok_or_else(|| AppError::Conflict("order has no broker_order_id yet".into()))?;

        let broker_req = BrokerOrderRequest {
            symbol: order.symbol.clone(),
            exchange: order.exchange.clone(),
            transaction_type: order.transaction_type,
            order_type: order_type.unwrap_or(order.order_type),
            product_type: order.product_type,
            quantity: quantity.unwrap_or(order.quantity),
            price: price.or(order.price),
            trigger_price: trigger_price.or(order.trigger_price),
            disclosed_quantity: order.disclosed_quantity,
            validity: order.validity.clone(),
            tag: order.broker_tag.clone(),
        };

        let broker = self.brokers.get(ctx.trading_account_id);
        broker
            .modify_order(&broker_order_id, &broker_req)
            .await
            .map_err(AppError::Internal)?;

        self.repo
            .apply_modification(order_id, quantity, price, trigger_price, order_type)
            .map_err(AppError::Internal)?;
        self.audit
            .record(
                order_id,
                Some(order.status),
                order.status,
                Actor::User(&ctx.user_id.to_string()),
                Some("modified"),
            )
            .map_err(AppError::Internal)?;

        self.repo
            .get(order_id)
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("order {order_id} vanished after modify")))
    }

    /// spec §4.1 `Cancel`. Broker-first.
    pub async fn cancel(&self, ctx: &RequestContext, order_id: i64) -> AppResult<Order> {
        let order = self.load_owned(ctx, order_id)?;
        if !CANCELLABLE.contains(&order.status) {
            return Err(AppError::Conflict(format!(
                "order {order_id} in status {:?} cannot be cancelled",
                order.status
            )));
        }
        let broker_order_id = order
            .broker_order_id
            .clone()
            .ok_or_else(|| AppError::Conflict("order has no broker_order_id yet".into()))?;

        let broker = self.brokers.get(ctx.trading_account_id);
        broker
            .cancel_order(&broker_order_id)
            .await
            .map_err(AppError::Internal)?;

        self.repo.apply_cancellation(order_id).map_err(AppError::Internal)?;
        self.audit
            .record(
                order_id,
                Some(order.status),
                OrderStatus::Cancelled,
                Actor::User(&ctx.user_id.to_string()),
                None,
            )
            .map_err(AppError::Internal)?;

        self.repo
            .get(order_id)
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("order {order_id} vanished after cancel")))
    }

    /// spec §4.1 `PlaceBatch`. Max 20 orders.
    pub async fn place_batch(
        &self,
        ctx: &RequestContext,
        reqs: Vec<PlaceOrderRequest>,
        atomic: bool,
    ) -> AppResult<BatchResult> {
        if reqs.len() > MAX_BATCH_SIZE {
            return Err(AppError::Validation(format!(
                "batch of {} exceeds max of {MAX_BATCH_SIZE}",
                reqs.len()
            )));
        }
        for req in &reqs {
            validate_structure(req)?;
        }

        let mut placed_order_ids: Vec<(usize, i64, String)> = Vec::new();
        let mut results = vec![BatchItemResult {
            index: 0,
            success: false,
            order: None,
            error: None,
        }; reqs.len()];

        for (index, req) in reqs.iter().enumerate() {
            match self.place(ctx, req.clone(), None).await {
                Ok(order) => {
                    if let Some(broker_order_id) = order.broker_order_id.clone() {
                        placed_order_ids.push((index, order.id, broker_order_id));
                    }
                    results[index] = BatchItemResult {
                        index,
                        success: true,
                        order: Some(order),
                        error: None,
                    };
                }
                Err(err) => {
                    results[index] = BatchItemResult {
                        index,
                        success: false,
                        order: None,
                        error: Some(err.to_string()),
                    };
                    if atomic {
                        for (placed_index, order_id, broker_order_id) in &placed_order_ids {
                            let broker = self.brokers.get(ctx.trading_account_id);
                            let _ = broker.cancel_order(broker_order_id).await;
                            let _ = self.repo.apply_cancellation(*order_id);
                            let _ = self.audit.record(
                                *order_id,
                                Some(OrderStatus::Submitted),
                                OrderStatus::Cancelled,
                                Actor::System("order_engine_batch_rollback"),
                                Some("atomic batch rollback"),
                            );
                            results[*placed_index].success = false;
                            results[*placed_index].error =
                                Some("rolled back: atomic batch failed on a later order".into());
                            results[*placed_index].order = None;
                        }
                        for item in results.iter_mut().skip(index + 1) {
                            item.error = Some("not attempted: atomic batch aborted".into());
                        }
                        return Ok(BatchResult {
                            results,
                            rollback_performed: true,
                        });
                    }
                }
            }
        }

        Ok(BatchResult {
            results,
            rollback_performed: false,
        })
    }

    pub fn get(&self, ctx: &RequestContext, order_id: i64) -> AppResult<Order> {
        self.load_owned(ctx, order_id)
    }

    pub fn list(&self, ctx: &RequestContext, mut filter: OrderFilter) -> AppResult<Vec<Order>> {
        filter.trading_account_id = Some(ctx.trading_account_id);
        self.repo.list(&filter).map_err(AppError::Internal)
    }

    pub fn count(&self, ctx: &RequestContext, mut filter: OrderFilter) -> AppResult<i64> {
        filter.trading_account_id = Some(ctx.trading_account_id);
        self.repo.count(&filter).map_err(AppError::Internal)
    }

    pub fn history(&self, order_id: i64) -> AppResult<Vec<crate::audit::AuditEntry>> {
        self.audit.history_for_order(order_id).map_err(AppError::Internal)
    }

    fn load_owned(&self, ctx: &RequestContext, order_id: i64) -> AppResult<Order> {
        let order = self
            .repo
            .get(order_id)
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
        if !ctx.can_access(order.trading_account_id) {
            return Err(AppError::NotFound(format!("order {order_id} not found")));
        }
        Ok(order)
    }
}

/// Wraps a single request the same shape a batch item would take, so a
/// lone `Place` call fingerprints identically to how the original records
/// idempotency bodies (spec §4.1).
#[derive(serde::Serialize)]
enum BatchShape<'a> {
    Single(&'a PlaceOrderRequest),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::test_support::{MockBroker, SingleBrokerPool};
    use crate::config::test_config;
    use crate::domain::{ProductType, TransactionType};
    use crate::idempotency::InMemoryIdempotencyBackend;
    use crate::ratelimit::InMemoryDailyQuotaStore;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn engine_with_mock(mock: Arc<MockBroker>) -> OrderEngine {
        let db = Pool::open_in_memory().expect("in-memory schema");
        let config = test_config();
        let pool: Arc<dyn BrokerPool> = Arc::new(SingleBrokerPool(mock));
        let rate_limiter = Arc::new(RateLimiter::new(&config, Arc::new(InMemoryDailyQuotaStore::default())));
        let idempotency = Arc::new(IdempotencyStore::new(
            Arc::new(InMemoryIdempotencyBackend::default()),
            config.operational.idempotency_ttl,
            config.operational.idempotency_fail_closed,
        ));
        OrderEngine::new(&config, db, rate_limiter, pool, idempotency)
    }

    fn ctx() -> RequestContext {
        RequestContext {
            request_id: "req-1".into(),
            trace_id: "trace-1".into(),
            span_id: "span-1".into(),
            user_id: Uuid::new_v4(),
            trading_account_id: 1,
            accessible_account_ids: vec![1],
        }
    }

    fn limit_buy(quantity: i64, price: Decimal) -> PlaceOrderRequest {
        PlaceOrderRequest {
            symbol: "RELIANCE".into(),
            exchange: "NSE".into(),
            transaction_type: TransactionType::Buy,
            order_type: OrderType::Limit,
            product_type: ProductType::CNC,
            variety: None,
            quantity,
            price: Some(price),
            trigger_price: None,
            disclosed_quantity: None,
            validity: None,
            strategy_id: None,
            portfolio_id: None,
            execution_id: None,
            tag: None,
            lot_size: None,
        }
    }

    #[tokio::test]
    async fn places_a_limit_buy_against_the_broker() {
        let mock = Arc::new(MockBroker::returning_order_id("BROKER-1"));
        let engine = engine_with_mock(mock.clone());

        let order = engine
            .place(&ctx(), limit_buy(10, dec!(2500)), None)
            .await
            .expect("order should place");

        assert_eq!(order.status, OrderStatus::Submitted);
        assert_eq!(order.broker_order_id.as_deref(), Some("BROKER-1"));
        assert_eq!(mock.placed.lock().len(), 1);
    }

    #[tokio::test]
    async fn rolls_back_the_pending_row_when_the_broker_rejects() {
        let mock = Arc::new(MockBroker::rejecting("margin shortfall"));
        let engine = engine_with_mock(mock);

        let err = engine
            .place(&ctx(), limit_buy(10, dec!(2500)), None)
            .await
            .expect_err("broker rejection should surface");
        assert!(matches!(err, AppError::Internal(_)));

        let remaining = engine
            .list(&ctx(), OrderFilter::default())
            .expect("list should still succeed");
        assert!(remaining.is_empty(), "rejected order must not leave a row behind");
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_returns_the_cached_order_without_a_second_broker_call() {
        let mock = Arc::new(MockBroker::returning_order_id("BROKER-1"));
        let engine = engine_with_mock(mock.clone());
        let req = limit_buy(10, dec!(2500));

        let first = engine
            .place(&ctx(), req.clone(), Some("idem-key-1".into()))
            .await
            .expect("first placement succeeds");
        let second = engine
            .place(&ctx(), req, Some("idem-key-1".into()))
            .await
            .expect("duplicate placement returns the cached order");

        assert_eq!(first.id, second.id);
        assert_eq!(mock.placed.lock().len(), 1, "broker must only see one placement");
    }

    #[tokio::test]
    async fn reused_idempotency_key_with_a_different_body_is_a_conflict() {
        let mock = Arc::new(MockBroker::returning_order_id("BROKER-1"));
        let engine = engine_with_mock(mock);

        engine
            .place(&ctx(), limit_buy(10, dec!(2500)), Some("idem-key-1".into()))
            .await
            .expect("first placement succeeds");

        let err = engine
            .place(&ctx(), limit_buy(20, dec!(2500)), Some("idem-key-1".into()))
            .await
            .expect_err("different body under the same key must conflict");
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn atomic_batch_rolls_back_earlier_fills_when_a_later_order_fails_risk_checks() {
        let mock = Arc::new(MockBroker::returning_order_id("BROKER-1"));
        let engine = engine_with_mock(mock.clone());

        let over_quantity_cap = test_config().risk.max_order_quantity as i64 + 1;
        let reqs = vec![limit_buy(10, dec!(2500)), limit_buy(over_quantity_cap, dec!(2500))];

        let result = engine
            .place_batch(&ctx(), reqs, true)
            .await
            .expect("place_batch itself should not error");

        assert!(result.rollback_performed);
        assert!(!result.results[0].success, "first order should be rolled back");
        assert!(result.results[1].error.is_some());
        assert_eq!(mock.cancelled.lock().len(), 1, "the placed order must be cancelled on rollback");

        let remaining = engine
            .list(&ctx(), OrderFilter::default())
            .expect("list should still succeed");
        assert!(
            remaining.iter().all(|o| o.status == OrderStatus::Cancelled),
            "no order should be left in a non-terminal state after rollback"
        );
    }
}
