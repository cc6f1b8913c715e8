//! Account tier ladder and persistence (spec §4.7): classifies each account
//! into HOT/WARM/COLD/DORMANT so the scheduler can poll accordingly.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::OptionalExtension;

use crate::db::Pool;
use crate::domain::{AccountTier, SyncTier};

const HOT_ACTIVITY_WINDOW_SECS: i64 = 300;
const WARM_ACTIVITY_WINDOW_HOURS: i64 = 24;
const DORMANT_INACTIVITY_DAYS: i64 = 7;

#[derive(Clone)]
pub struct TierClassifier {
    db: Pool,
}

/// Inputs the classifier needs per account; gathered by the caller from
/// `orders`/`positions` so this module stays storage-agnostic about those
/// tables.
#[derive(Debug, Clone, Copy)]
pub struct AccountActivity {
    pub trading_account_id: i64,
    pub has_active_orders: bool,
    pub has_open_positions: bool,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl TierClassifier {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }

    /// Priority ladder per spec §4.7, honoring an unexpired HOT promotion.
    pub fn classify(&self, activity: &AccountActivity, now: DateTime<Utc>, promoted_until: Option<DateTime<Utc>>) -> SyncTier {
        if promoted_until.is_some_and(|expiry| expiry > now) {
            return SyncTier::Hot;
        }
        if activity.has_active_orders {
            return SyncTier::Hot;
        }
        if let Some(last) = activity.last_activity_at {
            if now - last <= Duration::seconds(HOT_ACTIVITY_WINDOW_SECS) {
                return SyncTier::Hot;
            }
        }
        if activity.has_open_positions {
            return SyncTier::Warm;
        }
        if let Some(last) = activity.last_activity_at {
            if now - last <= Duration::hours(WARM_ACTIVITY_WINDOW_HOURS) {
                return SyncTier::Warm;
            }
            if now - last >= Duration::days(DORMANT_INACTIVITY_DAYS) {
                return SyncTier::Dormant;
            }
        } else {
            return SyncTier::Dormant;
        }
        SyncTier::Cold
    }

    /// Temporarily forces HOT regardless of the ladder (e.g. a hard refresh
    /// or imminent order placement), expiring at `until`.
    pub fn promote(&self, trading_account_id: i64, until: DateTime<Utc>) -> Result<()> {
        self.upsert(trading_account_id, SyncTier::Hot, Some(until), None)
    }

    pub fn upsert(
        &self,
        trading_account_id: i64,
        tier: SyncTier,
        hot_expires_at: Option<DateTime<Utc>>,
        last_activity_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO account_sync_tiers (trading_account_id, tier, hot_expires_at, last_activity_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(trading_account_id) DO UPDATE SET
                    tier = excluded.tier,
                    hot_expires_at = excluded.hot_expires_at,
                    last_activity_at = COALESCE(excluded.last_activity_at, account_sync_tiers.last_activity_at),
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    trading_account_id,
                    tier.as_str(),
                    hot_expires_at.map(|t| t.to_rfc3339()),
                    last_activity_at.map(|t| t.to_rfc3339()),
                    now,
                ],
            )
            .context("failed to upsert account tier")?;
            Ok(())
        })
    }

    pub fn list_by_tier(&self, tier: SyncTier) -> Result<Vec<AccountTier>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT trading_account_id, tier, hot_expires_at, last_activity_at, updated_at \
                 FROM account_sync_tiers WHERE tier = ?1",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![tier.as_str()], row_to_account_tier)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to list accounts by tier")?;
            Ok(rows)
        })
    }

    pub fn get(&self, trading_account_id: i64) -> Result<Option<AccountTier>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT trading_account_id, tier, hot_expires_at, last_activity_at, updated_at \
                 FROM account_sync_tiers WHERE trading_account_id = ?1",
                rusqlite::params![trading_account_id],
                row_to_account_tier,
            )
            .optional()
            .context("failed to read account tier")
        })
    }
}

fn row_to_account_tier(row: &rusqlite::Row) -> rusqlite::Result<AccountTier> {
    let parse_dt = |s: Option<String>| {
        s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    };
    Ok(AccountTier {
        trading_account_id: row.get(0)?,
        tier: SyncTier::from_str(&row.get::<_, String>(1)?).unwrap_or(SyncTier::Cold),
        hot_expires_at: parse_dt(row.get(2)?),
        last_activity_at: parse_dt(row.get(3)?),
        updated_at: parse_dt(row.get(4)?).unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(trading_account_id: i64) -> AccountActivity {
        AccountActivity {
            trading_account_id,
            has_active_orders: false,
            has_open_positions: false,
            last_activity_at: None,
        }
    }

    #[test]
    fn active_orders_always_classify_hot() {
        let db = Pool::open_in_memory().unwrap();
        let classifier = TierClassifier::new(db);
        let mut a = activity(1);
        a.has_active_orders = true;
        assert_eq!(classifier.classify(&a, Utc::now(), None), SyncTier::Hot);
    }

    #[test]
    fn no_activity_ever_is_dormant() {
        let db = Pool::open_in_memory().unwrap();
        let classifier = TierClassifier::new(db);
        assert_eq!(classifier.classify(&activity(1), Utc::now(), None), SyncTier::Dormant);
    }

    #[test]
    fn unexpired_promotion_overrides_the_ladder() {
        let db = Pool::open_in_memory().unwrap();
        let classifier = TierClassifier::new(db);
        let now = Utc::now();
        let until = now + Duration::minutes(5);
        assert_eq!(classifier.classify(&activity(1), now, Some(until)), SyncTier::Hot);
    }

    #[test]
    fn open_positions_without_recent_activity_are_warm() {
        let db = Pool::open_in_memory().unwrap();
        let classifier = TierClassifier::new(db);
        let mut a = activity(1);
        a.has_open_positions = true;
        a.last_activity_at = Some(Utc::now() - Duration::days(2));
        assert_eq!(classifier.classify(&a, Utc::now(), None), SyncTier::Warm);
    }

    #[test]
    fn upserts_and_lists_by_tier() {
        let db = Pool::open_in_memory().unwrap();
        let classifier = TierClassifier::new(db);
        classifier.upsert(1, SyncTier::Hot, None, Some(Utc::now())).unwrap();
        let hot = classifier.list_by_tier(SyncTier::Hot).unwrap();
        assert_eq!(hot.len(), 1);
        assert_eq!(hot[0].trading_account_id, 1);
    }
}
