//! SQLite-backed persistence for `GttOrder` (spec §3, §6 `/gtt` routes).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::Pool;
use crate::domain::{GttOrder, GttOrderLeg, GttStatus, GttType};

pub struct GttRepo {
    db: Pool,
}

impl GttRepo {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Pool {
        &self.db
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &self,
        trading_account_id: i64,
        gtt_type: GttType,
        symbol: &str,
        exchange: &str,
        trigger_prices: &[rust_decimal::Decimal],
        last_price: rust_decimal::Decimal,
        orders: &[GttOrderLeg],
    ) -> Result<GttOrder> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO gtt_orders (
                    trading_account_id, gtt_type, symbol, exchange, trigger_prices,
                    last_price, orders, status, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', ?8, ?8)",
                params![
                    trading_account_id,
                    gtt_type_str(gtt_type),
                    symbol,
                    exchange,
                    serde_json::to_string(trigger_prices).context("serialize trigger_prices")?,
                    last_price.to_string(),
                    serde_json::to_string(orders).context("serialize orders")?,
                    now,
                ],
            )
            .context("failed to insert gtt order")?;
            let id = conn.last_insert_rowid();
            conn.query_row("SELECT * FROM gtt_orders WHERE id = ?1", params![id], row_to_gtt)
                .context("failed to read back inserted gtt order")
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<GttOrder>> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT * FROM gtt_orders WHERE id = ?1", params![id], row_to_gtt)
                .optional()
                .context("failed to read gtt order")
        })
    }

    pub fn list(&self, trading_account_id: i64) -> Result<Vec<GttOrder>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM gtt_orders WHERE trading_account_id = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map(params![trading_account_id], row_to_gtt)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to list gtt orders")?;
            Ok(rows)
        })
    }

    pub fn set_broker_gtt_id(&self, id: i64, broker_gtt_id: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE gtt_orders SET broker_gtt_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![broker_gtt_id, Utc::now().to_rfc3339(), id],
            )
            .context("failed to set broker_gtt_id")?;
            Ok(())
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn apply_modification(
        &self,
        id: i64,
        trigger_prices: Option<&[rust_decimal::Decimal]>,
        last_price: Option<rust_decimal::Decimal>,
        orders: Option<&[GttOrderLeg]>,
    ) -> Result<()> {
        self.db.with_conn(|conn| {
            let existing = conn
                .query_row("SELECT * FROM gtt_orders WHERE id = ?1", params![id], row_to_gtt)
                .context("failed to load gtt order for modification")?;
            let trigger_prices = trigger_prices.unwrap_or(&existing.trigger_prices);
            let last_price = last_price.unwrap_or(existing.last_price);
            let orders = orders.unwrap_or(&existing.orders);
            conn.execute(
                "UPDATE gtt_orders SET trigger_prices = ?1, last_price = ?2, orders = ?3, updated_at = ?4 WHERE id = ?5",
                params![
                    serde_json::to_string(trigger_prices).context("serialize trigger_prices")?,
                    last_price.to_string(),
                    serde_json::to_string(orders).context("serialize orders")?,
                    Utc::now().to_rfc3339(),
                    id,
                ],
            )
            .context("failed to apply gtt modification")?;
            Ok(())
        })
    }

    pub fn set_status(&self, id: i64, status: GttStatus) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE gtt_orders SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![gtt_status_str(status), Utc::now().to_rfc3339(), id],
            )
            .context("failed to set gtt status")?;
            Ok(())
        })
    }
}

fn gtt_type_str(t: GttType) -> &'static str {
    match t {
        GttType::Single => "single",
        GttType::TwoLeg => "two-leg",
    }
}

fn parse_gtt_type(s: &str) -> GttType {
    match s {
        "two-leg" => GttType::TwoLeg,
        _ => GttType::Single,
    }
}

fn gtt_status_str(s: GttStatus) -> &'static str {
    match s {
        GttStatus::Active => "active",
        GttStatus::Triggered => "triggered",
        GttStatus::Cancelled => "cancelled",
        GttStatus::Expired => "expired",
        GttStatus::Deleted => "deleted",
    }
}

fn parse_gtt_status(s: &str) -> GttStatus {
    match s {
        "triggered" => GttStatus::Triggered,
        "cancelled" => GttStatus::Cancelled,
        "expired" => GttStatus::Expired,
        "deleted" => GttStatus::Deleted,
        _ => GttStatus::Active,
    }
}

fn row_to_gtt(row: &Row) -> rusqlite::Result<GttOrder> {
    let parse_dt = |s: String| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    };
    let trigger_prices: String = row.get("trigger_prices")?;
    let orders: String = row.get("orders")?;
    Ok(GttOrder {
        id: row.get("id")?,
        broker_gtt_id: row.get("broker_gtt_id")?,
        trading_account_id: row.get("trading_account_id")?,
        gtt_type: parse_gtt_type(&row.get::<_, String>("gtt_type")?),
        symbol: row.get("symbol")?,
        exchange: row.get("exchange")?,
        trigger_prices: serde_json::from_str(&trigger_prices).unwrap_or_default(),
        last_price: row.get::<_, String>("last_price")?.parse().unwrap_or_default(),
        orders: serde_json::from_str(&orders).unwrap_or_default(),
        status: parse_gtt_status(&row.get::<_, String>("status")?),
        created_at: parse_dt(row.get("created_at")?),
        updated_at: parse_dt(row.get("updated_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderType, TransactionType};
    use rust_decimal_macros::dec;

    fn leg() -> GttOrderLeg {
        GttOrderLeg {
            transaction_type: TransactionType::Buy,
            quantity: 10,
            order_type: OrderType::Limit,
            price: dec!(100),
        }
    }

    #[test]
    fn inserts_and_lists_by_account() {
        let db = Pool::open_in_memory().unwrap();
        let repo = GttRepo::new(db);
        let gtt = repo
            .insert(1, GttType::Single, "TCS", "NSE", &[dec!(95)], dec!(100), &[leg()])
            .unwrap();
        assert_eq!(gtt.status, GttStatus::Active);
        assert!(gtt.trigger_price_count_valid());

        let listed = repo.list(1).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn modification_preserves_unspecified_fields() {
        let db = Pool::open_in_memory().unwrap();
        let repo = GttRepo::new(db);
        let gtt = repo
            .insert(1, GttType::Single, "TCS", "NSE", &[dec!(95)], dec!(100), &[leg()])
            .unwrap();

        repo.apply_modification(gtt.id, Some(&[dec!(90)]), None, None).unwrap();
        let updated = repo.get(gtt.id).unwrap().unwrap();
        assert_eq!(updated.trigger_prices, vec![dec!(90)]);
        assert_eq!(updated.last_price, dec!(100));
    }
}
