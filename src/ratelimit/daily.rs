//! Persistent daily order quota with a market-close reset boundary,
//! grounded on the original `redis_daily_counter.py`'s
//! `RedisDailyCounter`/`InMemoryDailyCounter` pair.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Computes the IST trading date for `now`, given the (hour, minute) reset
/// boundary quantized once at policy construction (§9 timezone note): if
/// `now` is at or past today's reset, the trading date is tomorrow.
pub fn trading_date(now: DateTime<Utc>, reset_hour: u32, reset_minute: u32) -> NaiveDate {
    let now_ist = now.with_timezone(&Kolkata);
    let today = now_ist.date_naive();
    let reset_today = Kolkata
        .from_local_datetime(&today.and_hms_opt(reset_hour, reset_minute, 0).unwrap())
        .single()
        .unwrap();

    if now_ist >= reset_today {
        today + ChronoDuration::days(1)
    } else {
        today
    }
}

pub fn reset_time_for(trading_date: NaiveDate, reset_hour: u32, reset_minute: u32) -> DateTime<Utc> {
    let local = Kolkata
        .from_local_datetime(&trading_date.and_hms_opt(reset_hour, reset_minute, 0).unwrap())
        .single()
        .unwrap();
    local.with_timezone(&Utc)
}

#[async_trait]
pub trait DailyQuotaStore: Send + Sync {
    /// Atomically increments the counter for `(account, trading_date)`,
    /// returning the new count. Sets the TTL to "next reset + 1h" on the
    /// first increment for that key.
    async fn increment(&self, account_id: i64, trading_date: NaiveDate, ttl_seconds: i64) -> Result<u64>;

    async fn get_count(&self, account_id: i64, trading_date: NaiveDate) -> Result<u64>;
}

pub struct RedisDailyQuotaStore {
    client: redis::Client,
}

impl RedisDailyQuotaStore {
    pub fn new(redis_url: &str) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }

    fn key(account_id: i64, trading_date: NaiveDate) -> String {
        format!("kite:daily_orders:{account_id}:{trading_date}")
    }
}

#[async_trait]
impl DailyQuotaStore for RedisDailyQuotaStore {
    async fn increment(&self, account_id: i64, trading_date: NaiveDate, ttl_seconds: i64) -> Result<u64> {
        use redis::AsyncCommands;
        let mut conn = self.client.get_async_connection().await?;
        let key = Self::key(account_id, trading_date);
        let count: u64 = conn.incr(&key, 1u64).await?;
        if count == 1 {
            let _: () = conn.expire(&key, ttl_seconds as usize).await?;
        }
        Ok(count)
    }

    async fn get_count(&self, account_id: i64, trading_date: NaiveDate) -> Result<u64> {
        use redis::AsyncCommands;
        let mut conn = self.client.get_async_connection().await?;
        let count: Option<u64> = conn.get(Self::key(account_id, trading_date)).await?;
        Ok(count.unwrap_or(0))
    }
}

/// Degraded fallback used when Redis is unreachable; matches the original's
/// `InMemoryDailyCounter` process-local behavior (spec §11 supplement #4).
#[derive(Default)]
pub struct InMemoryDailyQuotaStore {
    counts: Mutex<HashMap<(i64, NaiveDate), u64>>,
}

#[async_trait]
impl DailyQuotaStore for InMemoryDailyQuotaStore {
    async fn increment(&self, account_id: i64, trading_date: NaiveDate, _ttl_seconds: i64) -> Result<u64> {
        let mut counts = self.counts.lock();
        let entry = counts.entry((account_id, trading_date)).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn get_count(&self, account_id: i64, trading_date: NaiveDate) -> Result<u64> {
        Ok(*self.counts.lock().get(&(account_id, trading_date)).unwrap_or(&0))
    }
}

/// Wraps a Redis-backed store, degrading to an in-memory counter on error
/// with a one-time warn log (spec §11 supplement #4).
pub struct FallbackDailyQuotaStore {
    primary: RedisDailyQuotaStore,
    fallback: InMemoryDailyQuotaStore,
    in_fallback: AtomicBool,
}

impl FallbackDailyQuotaStore {
    pub fn new(primary: RedisDailyQuotaStore) -> Self {
        Self {
            primary,
            fallback: InMemoryDailyQuotaStore::default(),
            in_fallback: AtomicBool::new(false),
        }
    }

    pub fn is_in_fallback_mode(&self) -> bool {
        self.in_fallback.load(Ordering::Relaxed)
    }

    /// Reconnect probe called periodically from the tier-scheduler runtime.
    pub async fn probe_reconnect(&self, account_id: i64, trading_date: NaiveDate) {
        if !self.is_in_fallback_mode() {
            return;
        }
        if self.primary.get_count(account_id, trading_date).await.is_ok() {
            self.in_fallback.store(false, Ordering::Relaxed);
            tracing::info!("daily quota store reconnected to redis, leaving fallback mode");
        }
    }
}

#[async_trait]
impl DailyQuotaStore for FallbackDailyQuotaStore {
    async fn increment(&self, account_id: i64, trading_date: NaiveDate, ttl_seconds: i64) -> Result<u64> {
        match self.primary.increment(account_id, trading_date, ttl_seconds).await {
            Ok(count) => Ok(count),
            Err(err) => {
                if !self.in_fallback.swap(true, Ordering::Relaxed) {
                    tracing::warn!(error = %err, "daily quota store entered fallback mode");
                }
                self.fallback.increment(account_id, trading_date, ttl_seconds).await
            }
        }
    }

    async fn get_count(&self, account_id: i64, trading_date: NaiveDate) -> Result<u64> {
        if self.is_in_fallback_mode() {
            return self.fallback.get_count(account_id, trading_date).await;
        }
        match self.primary.get_count(account_id, trading_date).await {
            Ok(count) => Ok(count),
            Err(_) => self.fallback.get_count(account_id, trading_date).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    #[test]
    fn order_at_1529_59_counts_toward_today() {
        let now = Kolkata
            .with_ymd_and_hms(2024, 3, 4, 15, 29, 59)
            .unwrap()
            .with_timezone(&Utc);
        let today = Kolkata.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap().date_naive();
        assert_eq!(trading_date(now, 15, 30), today);
    }

    #[test]
    fn order_at_1530_00_counts_toward_tomorrow() {
        let now = Kolkata
            .with_ymd_and_hms(2024, 3, 4, 15, 30, 0)
            .unwrap()
            .with_timezone(&Utc);
        let tomorrow = Kolkata.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap().date_naive();
        assert_eq!(trading_date(now, 15, 30), tomorrow);
    }

    #[tokio::test]
    async fn in_memory_store_increments_independently_per_account() {
        let store = InMemoryDailyQuotaStore::default();
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        assert_eq!(store.increment(1, day, 3600).await.unwrap(), 1);
        assert_eq!(store.increment(1, day, 3600).await.unwrap(), 2);
        assert_eq!(store.increment(2, day, 3600).await.unwrap(), 1);
    }
}
