//! Per-account rate limiter: sliding-window limits plus a persistent daily
//! quota with a market-close reset boundary (spec §4.2).

mod daily;
mod manager;
mod sliding;

pub use daily::{
    reset_time_for, trading_date, DailyQuotaStore, FallbackDailyQuotaStore, InMemoryDailyQuotaStore,
    RedisDailyQuotaStore,
};
pub use manager::{AccountRateLimitStats, AccountRateLimiter, Operation, RateLimiterManager};
pub use sliding::{Admission, SlidingWindowLimiter};

use std::sync::Arc;

use crate::config::Config;
use crate::error::AppError;

/// Combines the sliding-window manager with the daily quota store (spec
/// §4.2's "Daily quota" paragraph).
pub struct RateLimiter {
    pub manager: RateLimiterManager,
    pub daily: Arc<dyn DailyQuotaStore>,
    daily_order_limit: u64,
    reset_hour: u32,
    reset_minute: u32,
}

impl RateLimiter {
    pub fn new(config: &Config, daily: Arc<dyn DailyQuotaStore>) -> Self {
        Self {
            manager: RateLimiterManager::new(config.rate_limits.clone()),
            daily,
            daily_order_limit: config.rate_limits.daily_order_limit,
            reset_hour: config.rate_limits.daily_reset_hour,
            reset_minute: config.rate_limits.daily_reset_minute,
        }
    }

    pub async fn check_order_place(&self, account_id: i64) -> Result<(), AppError> {
        self.manager.check(account_id, Operation::OrderPlace)?;

        let now = chrono::Utc::now();
        let trading_day = trading_date(now, self.reset_hour, self.reset_minute);
        let current = self
            .daily
            .get_count(account_id, trading_day)
            .await
            .map_err(AppError::Internal)?;

        if current >= self.daily_order_limit {
            let reset_at = reset_time_for(trading_day, self.reset_hour, self.reset_minute);
            return Err(AppError::DailyLimitExceeded { reset_at });
        }
        Ok(())
    }

    /// Called only after the broker submission succeeds, so a rejected
    /// order never consumes a daily-quota slot.
    pub async fn record_order_placed(&self, account_id: i64) -> Result<(), AppError> {
        let now = chrono::Utc::now();
        let trading_day = trading_date(now, self.reset_hour, self.reset_minute);
        let reset_at = reset_time_for(trading_day, self.reset_hour, self.reset_minute);
        let ttl = (reset_at - now).num_seconds().max(0) + 3600;
        self.daily
            .increment(account_id, trading_day, ttl)
            .await
            .map_err(AppError::Internal)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    fn limiter_with_daily_cap(cap: u64) -> RateLimiter {
        let mut config = test_config();
        config.rate_limits.daily_order_limit = cap;
        RateLimiter::new(&config, Arc::new(InMemoryDailyQuotaStore::default()))
    }

    #[tokio::test]
    async fn admits_orders_until_the_daily_cap_then_rejects() {
        let limiter = limiter_with_daily_cap(2);

        limiter.check_order_place(1).await.expect("1st order admitted");
        limiter.record_order_placed(1).await.unwrap();
        limiter.check_order_place(1).await.expect("2nd order admitted");
        limiter.record_order_placed(1).await.unwrap();

        let err = limiter
            .check_order_place(1)
            .await
            .expect_err("3rd order must exceed the daily cap");
        assert!(matches!(err, AppError::DailyLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn daily_cap_is_tracked_independently_per_account() {
        let limiter = limiter_with_daily_cap(1);

        limiter.check_order_place(1).await.expect("account 1 admitted");
        limiter.record_order_placed(1).await.unwrap();
        limiter
            .check_order_place(1)
            .await
            .expect_err("account 1 is now over its cap");

        limiter
            .check_order_place(2)
            .await
            .expect("account 2's quota is untouched by account 1's usage");
    }
}
