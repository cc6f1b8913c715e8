//! Subscription manager (spec §4.9): tracks which instruments the streaming
//! tick bus should carry per account, batches market-data refreshes.

use anyhow::{Context, Result};
use rusqlite::OptionalExtension;
use tracing::debug;

use crate::clients::MarketDataClient;
use crate::db::Pool;
use crate::domain::{is_subscribable_segment, PositionSubscription, SubscriptionSource};

pub struct SubscriptionManager {
    db: Pool,
    market_data: MarketDataClient,
}

impl SubscriptionManager {
    pub fn new(db: Pool, market_data: MarketDataClient) -> Self {
        Self { db, market_data }
    }

    /// Adds or reactivates one subscription. Non-subscribable segments are
    /// still recorded (for SyncForAccount bookkeeping) but never fanned out.
    pub fn subscribe(
        &self,
        instrument_token: i64,
        trading_account_id: i64,
        source: SubscriptionSource,
        segment: &str,
    ) -> Result<PositionSubscription> {
        let is_subscribable = is_subscribable_segment(segment);
        self.db.with_conn(|conn| {
            let now = chrono::Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO position_subscriptions (instrument_token, trading_account_id, source, is_active, is_subscribable, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5)
                 ON CONFLICT(instrument_token, trading_account_id, source) DO UPDATE SET
                    is_active = 1, is_subscribable = excluded.is_subscribable",
                rusqlite::params![instrument_token, trading_account_id, source_str(source), is_subscribable as i64, now],
            )
            .context("failed to upsert subscription")?;
            conn.query_row(
                "SELECT id, instrument_token, trading_account_id, source, is_active, is_subscribable, created_at \
                 FROM position_subscriptions WHERE instrument_token = ?1 AND trading_account_id = ?2 AND source = ?3",
                rusqlite::params![instrument_token, trading_account_id, source_str(source)],
                row_to_subscription,
            )
            .context("failed to read subscription back after upsert")
        })
    }

    pub fn unsubscribe(&self, instrument_token: i64, trading_account_id: i64, source: SubscriptionSource) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE position_subscriptions SET is_active = 0 WHERE instrument_token = ?1 AND trading_account_id = ?2 AND source = ?3",
                rusqlite::params![instrument_token, trading_account_id, source_str(source)],
            )
            .context("failed to deactivate subscription")?;
            Ok(())
        })
    }

    pub fn list_active(&self, trading_account_id: i64) -> Result<Vec<PositionSubscription>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, instrument_token, trading_account_id, source, is_active, is_subscribable, created_at \
                 FROM position_subscriptions WHERE trading_account_id = ?1 AND is_active = 1",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![trading_account_id], row_to_subscription)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to list active subscriptions")?;
            Ok(rows)
        })
    }

    fn get(&self, instrument_token: i64, trading_account_id: i64, source: SubscriptionSource) -> Result<Option<PositionSubscription>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, instrument_token, trading_account_id, source, is_active, is_subscribable, created_at \
                 FROM position_subscriptions WHERE instrument_token = ?1 AND trading_account_id = ?2 AND source = ?3",
                rusqlite::params![instrument_token, trading_account_id, source_str(source)],
                row_to_subscription,
            )
            .optional()
            .context("failed to read subscription")
        })
    }

    /// Reconciles the subscription set for one account against its current
    /// open positions/holdings, refreshing the market-data service once at
    /// the end if anything changed (spec §4.9: "batched: one refresh after
    /// a bulk sync").
    pub async fn sync_for_account(
        &self,
        trading_account_id: i64,
        desired: &[(i64, SubscriptionSource, String)],
    ) -> Result<()> {
        let mut changed = false;
        let mut wanted = std::collections::HashSet::new();
        for (instrument_token, source, segment) in desired {
            wanted.insert(*instrument_token);
            let existing = self.get(*instrument_token, trading_account_id, *source)?;
            if existing.as_ref().map(|s| s.is_active).unwrap_or(false) {
                continue;
            }
            self.subscribe(*instrument_token, trading_account_id, *source, segment)?;
            changed = true;
        }

        for existing in self.list_active(trading_account_id)? {
            if !wanted.contains(&existing.instrument_token) {
                self.unsubscribe(existing.instrument_token, trading_account_id, existing.source)?;
                changed = true;
            }
        }

        if changed {
            self.market_data.refresh_subscriptions().await?;
            debug!(trading_account_id, "refreshed market-data subscriptions after sync");
        }
        Ok(())
    }

    /// Rebuilds every active account's subscription set on process startup
    /// (spec §4.5/§4.9 "RecoverOnStartup").
    pub async fn recover_on_startup(&self) -> Result<()> {
        self.market_data.refresh_subscriptions().await
    }
}

fn source_str(s: SubscriptionSource) -> &'static str {
    match s {
        SubscriptionSource::Position => "position",
        SubscriptionSource::Holding => "holding",
    }
}

fn parse_source(s: &str) -> SubscriptionSource {
    match s {
        "holding" => SubscriptionSource::Holding,
        _ => SubscriptionSource::Position,
    }
}

fn row_to_subscription(row: &rusqlite::Row) -> rusqlite::Result<PositionSubscription> {
    Ok(PositionSubscription {
        id: row.get(0)?,
        instrument_token: row.get(1)?,
        trading_account_id: row.get(2)?,
        source: parse_source(&row.get::<_, String>(3)?),
        is_active: row.get::<_, i64>(4)? != 0,
        is_subscribable: row.get::<_, i64>(5)? != 0,
        created_at: row
            .get::<_, String>(6)
            .ok()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now),
    })
}
