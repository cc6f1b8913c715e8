//! Startup configuration.
//!
//! Grounded on the teacher's `models::Config::from_env` (`dotenv().ok()` +
//! chained `env::var(...).unwrap_or(...).parse().unwrap_or(...)`), extended
//! to fail loudly for the handful of fields with no safe default, per §9's
//! "populate once at startup" design note.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub orders_per_sec: u32,
    pub orders_per_min: u32,
    pub api_per_sec: u32,
    pub quote_per_sec: u32,
    pub historical_per_sec: u32,
    pub daily_order_limit: u64,
    /// Quantized once at construction (§9 timezone note): reset boundary in
    /// the policy timezone (Asia/Kolkata), never reparsed per call.
    pub daily_reset_hour: u32,
    pub daily_reset_minute: u32,
    pub max_cached_accounts: usize,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            orders_per_sec: 10,
            orders_per_min: 200,
            api_per_sec: 10,
            quote_per_sec: 1,
            historical_per_sec: 3,
            daily_order_limit: 3000,
            daily_reset_hour: 15,
            daily_reset_minute: 30,
            max_cached_accounts: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskPolicy {
    pub max_order_quantity: u64,
    pub max_order_value: Decimal,
    pub margin_multiplier: Decimal,
    pub per_symbol_exposure_cap: Decimal,
    pub concentration_cap: Decimal,
    pub daily_loss_limit: Decimal,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            max_order_quantity: 100_000,
            max_order_value: dec!(10_000_000),
            margin_multiplier: dec!(1.0),
            per_symbol_exposure_cap: dec!(2_000_000),
            concentration_cap: dec!(0.25),
            daily_loss_limit: dec!(500_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperationalPolicy {
    pub reconciliation_interval: Duration,
    pub reconciliation_max_age: Duration,
    pub reconciliation_batch_size: usize,
    pub tick_batch_size: usize,
    pub tick_batch_interval: Duration,
    pub idempotency_ttl: Duration,
    pub idempotency_fail_closed: bool,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_recovery_timeout: Duration,
    pub broker_call_timeout: Duration,
    pub shutdown_grace_period: Duration,
    pub tier_hot_interval: Duration,
    pub tier_warm_interval: Duration,
    pub tier_cold_interval: Duration,
    pub tier_batch_size: usize,
    pub tier_batch_pause: Duration,
}

impl Default for OperationalPolicy {
    fn default() -> Self {
        Self {
            reconciliation_interval: Duration::from_secs(300),
            reconciliation_max_age: Duration::from_secs(24 * 3600),
            reconciliation_batch_size: 100,
            tick_batch_size: 100,
            tick_batch_interval: Duration::from_millis(500),
            idempotency_ttl: Duration::from_secs(24 * 3600),
            idempotency_fail_closed: true,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_recovery_timeout: Duration::from_secs(60),
            broker_call_timeout: Duration::from_secs(30),
            shutdown_grace_period: Duration::from_secs(30),
            tier_hot_interval: Duration::from_secs(30),
            tier_warm_interval: Duration::from_secs(120),
            tier_cold_interval: Duration::from_secs(900),
            tier_batch_size: 50,
            tier_batch_pause: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub redis_url: Option<String>,
    pub port: u16,
    pub environment: Environment,
    pub jwt_secret: String,
    pub internal_api_key: String,
    pub token_account_service_url: String,
    pub permission_service_url: String,
    pub market_data_service_url: String,
    pub broker_base_url: String,
    pub rate_limits: RateLimitPolicy,
    pub risk: RiskPolicy,
    pub operational: OperationalPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let database_path = env_or("DATABASE_PATH", "./order_core.db");
        let redis_url = std::env::var("REDIS_URL").ok();
        let port = env_parse("PORT", 8080u16);

        let environment = match env_or("ENVIRONMENT", "development").as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        };

        let jwt_secret = std::env::var("JWT_SECRET")
            .context("JWT_SECRET must be set (auth gateway shares this signing key)")?;

        // Open Question (c): INTERNAL_API_KEY resolution order is env var,
        // then nothing else — no network config-service fallback. Fail
        // loudly; this key gates every /internal/* route.
        let internal_api_key = std::env::var("INTERNAL_API_KEY")
            .context("INTERNAL_API_KEY must be set to protect /internal/* routes")?;

        let token_account_service_url = std::env::var("TOKEN_ACCOUNT_SERVICE_URL")
            .context("TOKEN_ACCOUNT_SERVICE_URL must be set")?;
        let permission_service_url = std::env::var("PERMISSION_SERVICE_URL")
            .context("PERMISSION_SERVICE_URL must be set")?;
        let market_data_service_url = std::env::var("MARKET_DATA_SERVICE_URL")
            .context("MARKET_DATA_SERVICE_URL must be set")?;
        let broker_base_url =
            std::env::var("BROKER_BASE_URL").context("BROKER_BASE_URL must be set")?;

        let mut rate_limits = RateLimitPolicy::default();
        rate_limits.orders_per_sec = env_parse("RATE_LIMIT_ORDERS_PER_SEC", rate_limits.orders_per_sec);
        rate_limits.orders_per_min = env_parse("RATE_LIMIT_ORDERS_PER_MIN", rate_limits.orders_per_min);
        rate_limits.daily_order_limit =
            env_parse("RATE_LIMIT_DAILY_ORDERS", rate_limits.daily_order_limit);

        if let Ok(reset) = std::env::var("DAILY_RESET_TIME") {
            let (h, m) = parse_hhmm(&reset)?;
            rate_limits.daily_reset_hour = h;
            rate_limits.daily_reset_minute = m;
        }

        let operational = OperationalPolicy::default();
        let risk = RiskPolicy::default();

        Ok(Self {
            database_path,
            redis_url,
            port,
            environment,
            jwt_secret,
            internal_api_key,
            token_account_service_url,
            permission_service_url,
            market_data_service_url,
            broker_base_url,
            rate_limits,
            risk,
            operational,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

/// Minimal config for tests that need a `Config` but never make a network
/// call — every `*_service_url` is a placeholder.
#[cfg(test)]
pub fn test_config() -> Config {
    Config {
        database_path: ":memory:".into(),
        redis_url: None,
        port: 0,
        environment: Environment::Development,
        jwt_secret: "test-secret".into(),
        internal_api_key: "test-internal-key".into(),
        token_account_service_url: "http://localhost".into(),
        permission_service_url: "http://localhost".into(),
        market_data_service_url: "http://localhost".into(),
        broker_base_url: "http://localhost".into(),
        rate_limits: RateLimitPolicy::default(),
        risk: RiskPolicy::default(),
        operational: OperationalPolicy::default(),
    }
}

fn parse_hhmm(s: &str) -> Result<(u32, u32)> {
    let mut parts = s.split(':');
    let h: u32 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .with_context(|| format!("invalid DAILY_RESET_TIME: {s}"))?;
    let m: u32 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .with_context(|| format!("invalid DAILY_RESET_TIME: {s}"))?;
    if h > 23 || m > 59 {
        bail!("DAILY_RESET_TIME out of range: {s}");
    }
    Ok((h, m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hhmm() {
        assert_eq!(parse_hhmm("15:30").unwrap(), (15, 30));
        assert!(parse_hhmm("24:00").is_err());
        assert!(parse_hhmm("garbage").is_err());
    }

    #[test]
    fn default_rate_limit_policy_matches_policy_table() {
        let p = RateLimitPolicy::default();
        assert_eq!(p.orders_per_sec, 10);
        assert_eq!(p.orders_per_min, 200);
        assert_eq!(p.daily_order_limit, 3000);
        assert_eq!((p.daily_reset_hour, p.daily_reset_minute), (15, 30));
    }
}
