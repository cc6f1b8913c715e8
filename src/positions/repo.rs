//! SQLite-backed persistence for `Position` (spec §3, §4.4).

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;

use crate::db::Pool;
use crate::domain::{ChargeBreakdown, Position, ProductType};

#[derive(Clone)]
pub struct PositionRepo {
    db: Pool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionPnlSummary {
    pub execution_id: String,
    pub trading_day: NaiveDate,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub positions_transferred_in: i64,
    pub positions_transferred_out: i64,
}

impl PositionRepo {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Pool {
        &self.db
    }

    pub fn find(
        &self,
        trading_account_id: i64,
        symbol: &str,
        exchange: &str,
        product_type: ProductType,
        trading_day: NaiveDate,
    ) -> Result<Option<Position>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM positions WHERE trading_account_id = ?1 AND symbol = ?2 AND exchange = ?3 \
                 AND product_type = ?4 AND trading_day = ?5",
                params![
                    trading_account_id,
                    symbol,
                    exchange,
                    product_type_str(product_type),
                    trading_day.to_string()
                ],
                row_to_position,
            )
            .optional()
            .context("failed to read position")
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<Position>> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT * FROM positions WHERE id = ?1", params![id], row_to_position)
                .optional()
                .context("failed to read position by id")
        })
    }

    pub fn list_open(&self, trading_account_id: i64) -> Result<Vec<Position>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM positions WHERE trading_account_id = ?1 AND is_open = 1 ORDER BY symbol",
            )?;
            let rows = stmt
                .query_map(params![trading_account_id], row_to_position)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to list open positions")?;
            Ok(rows)
        })
    }

    pub fn list_open_by_instrument(&self, instrument_token: i64) -> Result<Vec<Position>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM positions WHERE instrument_token = ?1 AND is_open = 1",
            )?;
            let rows = stmt
                .query_map(params![instrument_token], row_to_position)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to list open positions by instrument")?;
            Ok(rows)
        })
    }

    /// Inserts a brand-new position row (first fill for this key) and
    /// returns the assigned id.
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &self,
        trading_account_id: i64,
        symbol: &str,
        exchange: &str,
        product_type: ProductType,
        trading_day: NaiveDate,
        instrument_token: Option<i64>,
        strategy_id: Option<i64>,
        execution_id: Option<&str>,
    ) -> Result<i64> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO positions (
                    trading_account_id, symbol, exchange, product_type, trading_day,
                    instrument_token, strategy_id, execution_id, entry_execution_id,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9, ?9)",
                params![
                    trading_account_id,
                    symbol,
                    exchange,
                    product_type_str(product_type),
                    trading_day.to_string(),
                    instrument_token,
                    strategy_id,
                    execution_id,
                    now,
                ],
            )
            .context("failed to insert position")?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Persists the full set of running sums after a fill is applied
    /// in-memory (spec §4.4); the row lock is the DB connection mutex.
    #[allow(clippy::too_many_arguments)]
    pub fn save(&self, position: &Position) -> Result<()> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE positions SET
                    net_quantity = ?1, is_overnight = ?2,
                    buy_quantity = ?3, buy_value = ?4, buy_price = ?5,
                    sell_quantity = ?6, sell_value = ?7, sell_price = ?8,
                    realized_pnl = ?9, unrealized_pnl = ?10, total_pnl = ?11,
                    brokerage = ?12, stt = ?13, exchange_charges = ?14, gst = ?15,
                    sebi_charges = ?16, stamp_duty = ?17, total_charges = ?18, net_pnl = ?19,
                    last_price = ?20, close_price = ?21, is_open = ?22, closed_at = ?23,
                    updated_at = ?24
                 WHERE id = ?25",
                params![
                    position.net_quantity,
                    position.is_overnight as i64,
                    position.buy_quantity,
                    position.buy_value.to_string(),
                    position.buy_price.to_string(),
                    position.sell_quantity,
                    position.sell_value.to_string(),
                    position.sell_price.to_string(),
                    position.realized_pnl.to_string(),
                    position.unrealized_pnl.to_string(),
                    position.total_pnl.to_string(),
                    position.charges.brokerage.to_string(),
                    position.charges.stt.to_string(),
                    position.charges.exchange_charges.to_string(),
                    position.charges.gst.to_string(),
                    position.charges.sebi_charges.to_string(),
                    position.charges.stamp_duty.to_string(),
                    position.total_charges.to_string(),
                    position.net_pnl.to_string(),
                    position.last_price.map(|p| p.to_string()),
                    position.close_price.map(|p| p.to_string()),
                    position.is_open as i64,
                    position.closed_at.map(|t| t.to_rfc3339()),
                    now,
                    position.id,
                ],
            )
            .context("failed to save position")?;
            Ok(())
        })
    }

    /// Closes every open position for an account (spec §4.8: `account_deleted`
    /// closes positions rather than deleting them, preserving audit trail).
    /// Runs inside the caller's transaction.
    pub fn close_all_open_in_txn(txn: &rusqlite::Transaction<'_>, trading_account_id: i64, closed_at: DateTime<Utc>) -> Result<u64> {
        let closed = txn
            .execute(
                "UPDATE positions SET is_open = 0, closed_at = ?1, updated_at = ?1 \
                 WHERE trading_account_id = ?2 AND is_open = 1",
                params![closed_at.to_rfc3339(), trading_account_id],
            )
            .context("failed to close open positions for account")?;
        Ok(closed as u64)
    }

    /// Administrative force-close (spec §6 `POST /positions/{id}/close`):
    /// marks a position closed regardless of `net_quantity`, for operator
    /// write-offs and stale rows reconciliation never cleared.
    pub fn close_administratively(&self, id: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE positions SET is_open = 0, closed_at = ?1, updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )
            .context("failed to administratively close position")?;
            Ok(())
        })
    }

    /// Reassigns a position's current owner (spec §6 `POST
    /// /positions/{id}/move`, SPEC_FULL §11 supplement #1), recording a
    /// `position_transfers` row for the attribution split.
    pub fn transfer_execution(&self, id: i64, to_execution_id: &str, quantity: i64) -> Result<()> {
        self.db.with_transaction(|txn| {
            let from_execution_id: Option<String> = txn
                .query_row("SELECT execution_id FROM positions WHERE id = ?1", params![id], |row| row.get(0))
                .context("failed to load position for transfer")?;
            let now = Utc::now().to_rfc3339();
            txn.execute(
                "UPDATE positions SET execution_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![to_execution_id, now, id],
            )
            .context("failed to update position execution_id")?;
            txn.execute(
                "INSERT INTO position_transfers (position_id, from_execution_id, to_execution_id, quantity, transferred_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, from_execution_id, to_execution_id, quantity, now],
            )
            .context("failed to record position transfer")?;
            Ok(())
        })
    }

    /// Execution-level P&L attribution (SPEC_FULL §11 supplement #1):
    /// realized P&L belongs to whoever opened the position
    /// (`entry_execution_id`), unrealized to its current owner
    /// (`execution_id`), plus a same-day transfer count.
    pub fn execution_pnl_summary(&self, execution_id: &str, trading_day: NaiveDate) -> Result<ExecutionPnlSummary> {
        self.db.with_conn(|conn| {
            let realized: String = conn
                .query_row(
                    "SELECT COALESCE(SUM(realized_pnl), '0') FROM positions \
                     WHERE entry_execution_id = ?1 AND trading_day = ?2",
                    params![execution_id, trading_day.to_string()],
                    |row| row.get(0),
                )
                .context("failed to aggregate realized pnl by entry execution")?;
            let unrealized: String = conn
                .query_row(
                    "SELECT COALESCE(SUM(unrealized_pnl), '0') FROM positions \
                     WHERE execution_id = ?1 AND trading_day = ?2",
                    params![execution_id, trading_day.to_string()],
                    |row| row.get(0),
                )
                .context("failed to aggregate unrealized pnl by current execution")?;
            let transferred_in: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM position_transfers pt \
                     JOIN positions p ON p.id = pt.position_id \
                     WHERE pt.to_execution_id = ?1 AND p.trading_day = ?2",
                    params![execution_id, trading_day.to_string()],
                    |row| row.get(0),
                )
                .unwrap_or(0);
            let transferred_out: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM position_transfers pt \
                     JOIN positions p ON p.id = pt.position_id \
                     WHERE pt.from_execution_id = ?1 AND p.trading_day = ?2",
                    params![execution_id, trading_day.to_string()],
                    |row| row.get(0),
                )
                .unwrap_or(0);

            Ok(ExecutionPnlSummary {
                execution_id: execution_id.to_string(),
                trading_day,
                realized_pnl: realized.parse().unwrap_or(Decimal::ZERO),
                unrealized_pnl: unrealized.parse().unwrap_or(Decimal::ZERO),
                positions_transferred_in: transferred_in,
                positions_transferred_out: transferred_out,
            })
        })
    }

    /// Batched tick update (spec §4.5): recomputes unrealized/total/net P&L
    /// for every open row on one instrument in a single UPDATE.
    pub fn apply_tick_to_instrument(&self, instrument_token: i64, last_price: Decimal) -> Result<u64> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let updated = conn.execute(
                "UPDATE positions SET
                    last_price = ?1,
                    unrealized_pnl = CASE
                        WHEN net_quantity > 0 THEN (?1 - buy_price) * net_quantity
                        WHEN net_quantity < 0 THEN (sell_price - ?1) * (-net_quantity)
                        ELSE 0
                    END,
                    total_pnl = realized_pnl + (CASE
                        WHEN net_quantity > 0 THEN (?1 - buy_price) * net_quantity
                        WHEN net_quantity < 0 THEN (sell_price - ?1) * (-net_quantity)
                        ELSE 0
                    END),
                    net_pnl = realized_pnl + (CASE
                        WHEN net_quantity > 0 THEN (?1 - buy_price) * net_quantity
                        WHEN net_quantity < 0 THEN (sell_price - ?1) * (-net_quantity)
                        ELSE 0
                    END) - total_charges,
                    updated_at = ?2
                 WHERE instrument_token = ?3 AND is_open = 1",
                params![last_price.to_string(), now, instrument_token],
            )
            .context("failed to apply tick to instrument")?;
            Ok(updated as u64)
        })
    }
}

fn product_type_str(t: ProductType) -> &'static str {
    match t {
        ProductType::CNC => "CNC",
        ProductType::MIS => "MIS",
        ProductType::NRML => "NRML",
    }
}

fn parse_product_type(s: &str) -> ProductType {
    match s {
        "MIS" => ProductType::MIS,
        "NRML" => ProductType::NRML,
        _ => ProductType::CNC,
    }
}

fn row_to_position(row: &Row) -> rusqlite::Result<Position> {
    let parse_decimal = |s: String| s.parse().unwrap_or(Decimal::ZERO);
    let parse_opt_decimal = |s: Option<String>| s.and_then(|s| s.parse().ok());
    let parse_dt = |s: Option<String>| {
        s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    };

    Ok(Position {
        id: row.get("id")?,
        trading_account_id: row.get("trading_account_id")?,
        symbol: row.get("symbol")?,
        exchange: row.get("exchange")?,
        product_type: parse_product_type(&row.get::<_, String>("product_type")?),
        trading_day: NaiveDate::parse_from_str(&row.get::<_, String>("trading_day")?, "%Y-%m-%d")
            .unwrap_or_default(),
        net_quantity: row.get("net_quantity")?,
        is_overnight: row.get::<_, i64>("is_overnight")? != 0,
        buy_quantity: row.get("buy_quantity")?,
        buy_value: parse_decimal(row.get("buy_value")?),
        buy_price: parse_decimal(row.get("buy_price")?),
        sell_quantity: row.get("sell_quantity")?,
        sell_value: parse_decimal(row.get("sell_value")?),
        sell_price: parse_decimal(row.get("sell_price")?),
        realized_pnl: parse_decimal(row.get("realized_pnl")?),
        unrealized_pnl: parse_decimal(row.get("unrealized_pnl")?),
        total_pnl: parse_decimal(row.get("total_pnl")?),
        charges: ChargeBreakdown {
            brokerage: parse_decimal(row.get("brokerage")?),
            stt: parse_decimal(row.get("stt")?),
            exchange_charges: parse_decimal(row.get("exchange_charges")?),
            gst: parse_decimal(row.get("gst")?),
            sebi_charges: parse_decimal(row.get("sebi_charges")?),
            stamp_duty: parse_decimal(row.get("stamp_duty")?),
        },
        total_charges: parse_decimal(row.get("total_charges")?),
        net_pnl: parse_decimal(row.get("net_pnl")?),
        last_price: parse_opt_decimal(row.get("last_price")?),
        close_price: parse_opt_decimal(row.get("close_price")?),
        is_open: row.get::<_, i64>("is_open")? != 0,
        instrument_token: row.get("instrument_token")?,
        strategy_id: row.get("strategy_id")?,
        execution_id: row.get("execution_id")?,
        entry_execution_id: row.get("entry_execution_id")?,
        closed_at: parse_dt(row.get("closed_at")?),
        created_at: parse_dt(row.get("created_at")?).unwrap_or_else(Utc::now),
        updated_at: parse_dt(row.get("updated_at")?).unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn inserts_and_finds_position_by_key() {
        let db = Pool::open_in_memory().unwrap();
        let repo = PositionRepo::new(db);
        let day = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let id = repo
            .insert(1, "RELIANCE", "NSE", ProductType::CNC, day, Some(100), None, None)
            .unwrap();

        let found = repo.find(1, "RELIANCE", "NSE", ProductType::CNC, day).unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.net_quantity, 0);
    }

    #[test]
    fn transfer_execution_records_a_transfer_row_and_updates_owner() {
        let db = Pool::open_in_memory().unwrap();
        let repo = PositionRepo::new(db);
        let day = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let id = repo
            .insert(1, "RELIANCE", "NSE", ProductType::CNC, day, Some(100), None, Some("exec-a"))
            .unwrap();

        repo.transfer_execution(id, "exec-b", 10).unwrap();

        let position = repo.get(id).unwrap().unwrap();
        assert_eq!(position.execution_id.as_deref(), Some("exec-b"));
        assert_eq!(position.entry_execution_id.as_deref(), Some("exec-a"));
    }

    #[test]
    fn close_administratively_closes_regardless_of_net_quantity() {
        let db = Pool::open_in_memory().unwrap();
        let repo = PositionRepo::new(db);
        let day = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let id = repo.insert(1, "RELIANCE", "NSE", ProductType::CNC, day, Some(100), None, None).unwrap();

        repo.close_administratively(id).unwrap();

        let position = repo.get(id).unwrap().unwrap();
        assert!(!position.is_open);
        assert!(position.closed_at.is_some());
    }
}
