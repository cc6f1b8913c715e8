//! Per-account rate limiter manager with LRU eviction, grounded on the
//! original `KiteAccountRateLimiterManager` (`kite_account_rate_limiter.py`).

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::config::RateLimitPolicy;
use crate::error::AppError;

use super::sliding::{Admission, SlidingWindowLimiter};

/// Classifies which bucket(s) an operation is gated by (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    OrderPlace,
    OrderModify,
    OrderCancel,
    Api,
    Quote,
    Historical,
}

pub struct AccountRateLimiter {
    orders_per_sec: SlidingWindowLimiter,
    orders_per_min: SlidingWindowLimiter,
    api_per_sec: SlidingWindowLimiter,
    quote_per_sec: SlidingWindowLimiter,
    historical_per_sec: SlidingWindowLimiter,
    rejections: Mutex<u64>,
}

impl AccountRateLimiter {
    fn new(policy: &RateLimitPolicy) -> Self {
        Self {
            orders_per_sec: SlidingWindowLimiter::new(policy.orders_per_sec, Duration::from_secs(1)),
            orders_per_min: SlidingWindowLimiter::new(policy.orders_per_min, Duration::from_secs(60)),
            api_per_sec: SlidingWindowLimiter::new(policy.api_per_sec, Duration::from_secs(1)),
            quote_per_sec: SlidingWindowLimiter::new(policy.quote_per_sec, Duration::from_secs(1)),
            historical_per_sec: SlidingWindowLimiter::new(
                policy.historical_per_sec,
                Duration::from_secs(1),
            ),
            rejections: Mutex::new(0),
        }
    }

    /// Checks every bucket an operation is gated by; admits only if all
    /// relevant buckets admit (spec §4.2 operation classification).
    pub fn check(&self, op: Operation) -> Result<(), AppError> {
        let limiters: &[&SlidingWindowLimiter] = match op {
            Operation::OrderPlace | Operation::OrderModify | Operation::OrderCancel => {
                &[&self.orders_per_sec, &self.orders_per_min]
            }
            Operation::Api => &[&self.api_per_sec],
            Operation::Quote => &[&self.quote_per_sec],
            Operation::Historical => &[&self.historical_per_sec],
        };

        let mut worst_retry: Option<Duration> = None;
        for limiter in limiters {
            if let Admission::Denied { retry_after } = limiter.check() {
                worst_retry = Some(worst_retry.map_or(retry_after, |w| w.max(retry_after)));
            }
        }

        if let Some(retry_after) = worst_retry {
            *self.rejections.lock() += 1;
            return Err(AppError::RateLimitExceeded { retry_after });
        }
        Ok(())
    }

    pub fn stats(&self) -> AccountRateLimitStats {
        AccountRateLimitStats {
            orders_per_sec_used: self.orders_per_sec.used(),
            orders_per_min_used: self.orders_per_min.used(),
            api_per_sec_used: self.api_per_sec.used(),
            quote_per_sec_used: self.quote_per_sec.used(),
            historical_per_sec_used: self.historical_per_sec.used(),
            rejections: *self.rejections.lock(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccountRateLimitStats {
    pub orders_per_sec_used: u32,
    pub orders_per_min_used: u32,
    pub api_per_sec_used: u32,
    pub quote_per_sec_used: u32,
    pub historical_per_sec_used: u32,
    pub rejections: u64,
}

struct ManagerInner {
    accounts: HashMap<i64, Arc<AccountRateLimiter>>,
    lru: VecDeque<i64>,
}

/// LRU-evicted per-account limiter cache (spec §4.2: "cap ~1000 cached").
pub struct RateLimiterManager {
    policy: RateLimitPolicy,
    inner: Mutex<ManagerInner>,
}

impl RateLimiterManager {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(ManagerInner {
                accounts: HashMap::new(),
                lru: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, account_id: i64) -> Arc<AccountRateLimiter> {
        let mut inner = self.inner.lock();

        if let Some(limiter) = inner.accounts.get(&account_id).cloned() {
            inner.lru.retain(|&id| id != account_id);
            inner.lru.push_back(account_id);
            return limiter;
        }

        let limiter = Arc::new(AccountRateLimiter::new(&self.policy));
        inner.accounts.insert(account_id, limiter.clone());
        inner.lru.push_back(account_id);

        while inner.accounts.len() > self.policy.max_cached_accounts {
            if let Some(evict_id) = inner.lru.pop_front() {
                inner.accounts.remove(&evict_id);
            } else {
                break;
            }
        }

        limiter
    }

    pub fn check(&self, account_id: i64, op: Operation) -> Result<(), AppError> {
        self.get(account_id).check(op)
    }

    pub fn cached_account_count(&self) -> usize {
        self.inner.lock().accounts.len()
    }

    /// Operational-visibility snapshot, grounded on
    /// `KiteAccountRateLimiterManager.get_all_stats()` (spec §11 supplement #3).
    pub fn all_stats(&self) -> HashMap<i64, AccountRateLimitStats> {
        self.inner
            .lock()
            .accounts
            .iter()
            .map(|(id, limiter)| (*id, limiter.stats()))
            .collect()
    }

    /// Accounts whose per-second order bucket is within `threshold` of the
    /// configured limit (spec §11 supplement #3).
    pub fn accounts_near_limit(&self, threshold: f64) -> Vec<i64> {
        let limit = self.policy.orders_per_sec as f64;
        self.inner
            .lock()
            .accounts
            .iter()
            .filter(|(_, limiter)| {
                let used = limiter.stats().orders_per_sec_used as f64;
                limit > 0.0 && used / limit >= threshold
            })
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RateLimitPolicy {
        RateLimitPolicy {
            orders_per_sec: 2,
            orders_per_min: 200,
            api_per_sec: 10,
            quote_per_sec: 1,
            historical_per_sec: 3,
            daily_order_limit: 3000,
            daily_reset_hour: 15,
            daily_reset_minute: 30,
            max_cached_accounts: 2,
        }
    }

    #[test]
    fn order_place_checks_both_order_buckets() {
        let manager = RateLimiterManager::new(policy());
        assert!(manager.check(1, Operation::OrderPlace).is_ok());
        assert!(manager.check(1, Operation::OrderPlace).is_ok());
        assert!(manager.check(1, Operation::OrderPlace).is_err());
    }

    #[test]
    fn buckets_are_independent_per_account() {
        let manager = RateLimiterManager::new(policy());
        assert!(manager.check(1, Operation::OrderPlace).is_ok());
        assert!(manager.check(1, Operation::OrderPlace).is_ok());
        assert!(manager.check(2, Operation::OrderPlace).is_ok());
    }

    #[test]
    fn evicts_least_recently_used_account_past_cap() {
        let manager = RateLimiterManager::new(policy());
        manager.get(1);
        manager.get(2);
        manager.get(3);
        assert_eq!(manager.cached_account_count(), 2);
    }
}
