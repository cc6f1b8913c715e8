//! Wires every subsystem into one `Clone`-able handle shared by the HTTP
//! layer and the background runtime (spec §9 "inject, don't import").

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::accounts::AccountEventHandler;
use crate::auth::JwtHandler;
use crate::broker::{BrokerClientPool, BrokerPool};
use crate::clients::{MarketDataClient, PermissionClient, TokenAccountClient};
use crate::config::Config;
use crate::db::Pool;
use crate::gtt::GttEngine;
use crate::idempotency::IdempotencyStore;
use crate::orders::{OrderEngine, OrderRepo};
use crate::positions::{PositionRepo, PositionTracker, StrategyPnlRepo, TradeRepo};
use crate::ratelimit::RateLimiter;
use crate::reconcile::ReconciliationWorker;
use crate::subscriptions::SubscriptionManager;
use crate::tiers::TierClassifier;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Pool,
    pub jwt: Arc<JwtHandler>,
    pub permission_client: Arc<PermissionClient>,
    pub orders: Arc<OrderEngine>,
    /// Bare repo handle for internal/admin routes that need to read an
    /// order by id without the caller-ownership check `OrderEngine` applies.
    pub order_repo: Arc<OrderRepo>,
    pub positions: Arc<PositionRepo>,
    pub tracker: Arc<PositionTracker>,
    pub trades: Arc<TradeRepo>,
    pub strategy_pnl: Arc<StrategyPnlRepo>,
    pub gtt: Arc<GttEngine>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub tiers: Arc<TierClassifier>,
    pub accounts: Arc<AccountEventHandler>,
    pub reconcile: Arc<ReconciliationWorker>,
    pub rate_limiter: Arc<RateLimiter>,
    pub idempotency: Arc<IdempotencyStore>,
    pub brokers: Arc<dyn BrokerPool>,
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    pub fn build(config: Config, metrics_handle: PrometheusHandle) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let db = Pool::open(&config.database_path)?;

        let http = reqwest::Client::builder()
            .timeout(config.operational.broker_call_timeout)
            .build()?;

        let token_account_client = Arc::new(TokenAccountClient::new(
            http.clone(),
            config.token_account_service_url.clone(),
            config.internal_api_key.clone(),
        ));
        let permission_client = Arc::new(PermissionClient::new(
            http.clone(),
            config.permission_service_url.clone(),
            config.internal_api_key.clone(),
        ));
        let market_data_client = MarketDataClient::new(http.clone(), config.market_data_service_url.clone());

        let brokers: Arc<dyn BrokerPool> = Arc::new(BrokerClientPool::new(
            http.clone(),
            config.broker_base_url.clone(),
            token_account_client,
            config.operational.broker_call_timeout,
        ));

        let daily_quota: Arc<dyn crate::ratelimit::DailyQuotaStore> = match &config.redis_url {
            Some(url) => Arc::new(crate::ratelimit::FallbackDailyQuotaStore::new(
                crate::ratelimit::RedisDailyQuotaStore::new(url)?,
            )),
            None => Arc::new(crate::ratelimit::InMemoryDailyQuotaStore::default()),
        };
        let rate_limiter = Arc::new(RateLimiter::new(&config, daily_quota));

        let idempotency_backend: Arc<dyn crate::idempotency::IdempotencyBackend> = match &config.redis_url {
            Some(url) => Arc::new(crate::idempotency::RedisIdempotencyBackend::new(url)?),
            None => Arc::new(crate::idempotency::InMemoryIdempotencyBackend::default()),
        };
        let idempotency = Arc::new(IdempotencyStore::new(
            idempotency_backend,
            config.operational.idempotency_ttl,
            config.operational.idempotency_fail_closed,
        ));

        let orders = Arc::new(OrderEngine::new(
            &config,
            db.clone(),
            rate_limiter.clone(),
            brokers.clone(),
            idempotency.clone(),
        ));

        let order_repo = Arc::new(OrderRepo::new(db.clone()));
        let positions = Arc::new(PositionRepo::new(db.clone()));
        let tracker = Arc::new(PositionTracker::new(PositionRepo::new(db.clone())));
        let trades = Arc::new(TradeRepo::new(db.clone()));
        let strategy_pnl = Arc::new(StrategyPnlRepo::new(db.clone()));

        let gtt = Arc::new(GttEngine::new(crate::gtt::GttRepo::new(db.clone()), brokers.clone()));

        let subscriptions = Arc::new(SubscriptionManager::new(db.clone(), market_data_client));
        let tiers = Arc::new(TierClassifier::new(db.clone()));
        let accounts = Arc::new(AccountEventHandler::new(db.clone()));

        let reconcile = Arc::new(ReconciliationWorker::new(
            crate::orders::OrderRepo::new(db.clone()),
            TradeRepo::new(db.clone()),
            PositionTracker::new(PositionRepo::new(db.clone())),
            brokers.clone(),
            config.operational.reconciliation_max_age.as_secs() as i64 / 3600,
            config.operational.reconciliation_batch_size as i64,
        ));

        let jwt = Arc::new(JwtHandler::new(config.jwt_secret.clone()));

        Ok(Self {
            config,
            db,
            jwt,
            permission_client,
            orders,
            order_repo,
            positions,
            tracker,
            trades,
            strategy_pnl,
            gtt,
            subscriptions,
            tiers,
            accounts,
            reconcile,
            rate_limiter,
            idempotency,
            brokers,
            metrics_handle,
        })
    }
}
