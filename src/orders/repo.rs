//! SQLite-backed persistence for `Order` (spec §3, §4.1).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::Pool;
use crate::domain::{
    Order, OrderSource, OrderStatus, OrderType, OrderVariety, ProductType, TransactionType,
};

#[derive(Clone)]
pub struct OrderRepo {
    db: Pool,
}

#[derive(Debug, Default, Clone)]
pub struct OrderFilter {
    pub trading_account_id: Option<i64>,
    pub symbol: Option<String>,
    pub status: Option<OrderStatus>,
    pub position_id: Option<i64>,
    pub execution_id: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub ids: Option<Vec<i64>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl OrderRepo {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Pool {
        &self.db
    }

    pub fn get(&self, id: i64) -> Result<Option<Order>> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT * FROM orders WHERE id = ?1", params![id], row_to_order)
                .optional()
                .context("failed to read order")
        })
    }

    pub fn get_by_broker_order_id(&self, broker_order_id: &str) -> Result<Option<Order>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM orders WHERE broker_order_id = ?1",
                params![broker_order_id],
                row_to_order,
            )
            .optional()
            .context("failed to read order by broker_order_id")
        })
    }

    pub fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        self.db.with_conn(|conn| {
            let mut sql = String::from("SELECT * FROM orders WHERE 1=1");
            let mut bind: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(account_id) = filter.trading_account_id {
                sql.push_str(" AND trading_account_id = ?");
                bind.push(Box::new(account_id));
            }
            if let Some(symbol) = &filter.symbol {
                sql.push_str(" AND symbol = ?");
                bind.push(Box::new(symbol.clone()));
            }
            if let Some(status) = filter.status {
                sql.push_str(" AND status = ?");
                bind.push(Box::new(status.as_str().to_string()));
            }
            if let Some(position_id) = filter.position_id {
                sql.push_str(" AND position_id = ?");
                bind.push(Box::new(position_id));
            }
            if let Some(execution_id) = &filter.execution_id {
                sql.push_str(" AND execution_id = ?");
                bind.push(Box::new(execution_id.clone()));
            }
            if let Some(after) = filter.created_after {
                sql.push_str(" AND created_at >= ?");
                bind.push(Box::new(after.to_rfc3339()));
            }
            if let Some(before) = filter.created_before {
                sql.push_str(" AND created_at <= ?");
                bind.push(Box::new(before.to_rfc3339()));
            }
            if let Some(ids) = &filter.ids {
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                sql.push_str(&format!(" AND id IN ({placeholders})"));
                for id in ids {
                    bind.push(Box::new(*id));
                }
            }

            sql.push_str(" ORDER BY created_at DESC");
            if let Some(limit) = filter.limit {
                sql.push_str(" LIMIT ?");
                bind.push(Box::new(limit));
            }
            if let Some(offset) = filter.offset {
                sql.push_str(" OFFSET ?");
                bind.push(Box::new(offset));
            }

            let mut stmt = conn.prepare(&sql)?;
            let params_ref: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
            let rows = stmt
                .query_map(params_ref.as_slice(), row_to_order)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to list orders")?;
            Ok(rows)
        })
    }

    pub fn count(&self, filter: &OrderFilter) -> Result<i64> {
        Ok(self.list(filter)?.len() as i64)
    }

    /// Inserts a new PENDING row inside the caller's transaction, returning
    /// the assigned id. Called only from `OrderEngine::place` so the row
    /// and its ORDER_CREATED audit event commit atomically.
    pub fn insert_pending(
        txn: &rusqlite::Transaction<'_>,
        user_id: &str,
        trading_account_id: i64,
        strategy_id: Option<i64>,
        portfolio_id: Option<i64>,
        execution_id: Option<&str>,
        source: OrderSource,
        symbol: &str,
        exchange: &str,
        transaction_type: TransactionType,
        order_type: OrderType,
        product_type: ProductType,
        variety: OrderVariety,
        quantity: i64,
        price: Option<rust_decimal::Decimal>,
        trigger_price: Option<rust_decimal::Decimal>,
        disclosed_quantity: Option<i64>,
        validity: &str,
        broker_tag: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        txn.execute(
            "INSERT INTO orders (
                user_id, trading_account_id, strategy_id, portfolio_id, execution_id, source,
                symbol, exchange, transaction_type, order_type, product_type, variety,
                quantity, filled_quantity, pending_quantity, cancelled_quantity,
                price, trigger_price, validity, disclosed_quantity, status,
                risk_check_passed, broker_tag, idempotency_key, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9, ?10, ?11, ?12,
                ?13, 0, ?13, 0,
                ?14, ?15, ?16, ?17, 'PENDING',
                1, ?18, ?19, ?20, ?20
            )",
            params![
                user_id,
                trading_account_id,
                strategy_id,
                portfolio_id,
                execution_id,
                source.as_db_str(),
                symbol,
                exchange,
                transaction_type_str(transaction_type),
                order_type_str(order_type),
                product_type_str(product_type),
                variety_str(variety),
                quantity,
                price.map(|p| p.to_string()),
                trigger_price.map(|p| p.to_string()),
                validity,
                disclosed_quantity,
                broker_tag,
                idempotency_key,
                now,
            ],
        )
        .context("failed to insert pending order")?;
        Ok(txn.last_insert_rowid())
    }

    pub fn mark_submitted(
        txn: &rusqlite::Transaction<'_>,
        order_id: i64,
        broker_order_id: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        txn.execute(
            "UPDATE orders SET status = 'SUBMITTED', broker_order_id = ?1, submitted_at = ?2, updated_at = ?2 WHERE id = ?3",
            params![broker_order_id, now, order_id],
        )
        .context("failed to mark order submitted")?;
        Ok(())
    }

    pub fn mark_rejected(txn: &rusqlite::Transaction<'_>, order_id: i64, reason: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        txn.execute(
            "UPDATE orders SET status = 'REJECTED', status_message = ?1, completed_at = ?2, updated_at = ?2 WHERE id = ?3",
            params![reason, now, order_id],
        )
        .context("failed to mark order rejected")?;
        Ok(())
    }

    pub fn apply_modification(
        &self,
        order_id: i64,
        quantity: Option<i64>,
        price: Option<rust_decimal::Decimal>,
        trigger_price: Option<rust_decimal::Decimal>,
        order_type: Option<OrderType>,
    ) -> Result<()> {
        self.db.with_conn(|conn| {
            let order = conn
                .query_row("SELECT * FROM orders WHERE id = ?1", params![order_id], row_to_order)
                .context("order not found during modification")?;
            let new_quantity = quantity.unwrap_or(order.quantity);
            let new_pending = new_quantity - order.filled_quantity;
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE orders SET quantity = ?1, pending_quantity = ?2, price = COALESCE(?3, price), \
                 trigger_price = COALESCE(?4, trigger_price), order_type = COALESCE(?5, order_type), updated_at = ?6 \
                 WHERE id = ?7",
                params![
                    new_quantity,
                    new_pending,
                    price.map(|p| p.to_string()),
                    trigger_price.map(|p| p.to_string()),
                    order_type.map(order_type_str),
                    now,
                    order_id,
                ],
            )
            .context("failed to apply order modification")?;
            Ok(())
        })
    }

    pub fn apply_cancellation(&self, order_id: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE orders SET status = 'CANCELLED', cancelled_quantity = pending_quantity, \
                 pending_quantity = 0, completed_at = ?1, updated_at = ?1 WHERE id = ?2",
                params![now, order_id],
            )
            .context("failed to apply cancellation")?;
            Ok(())
        })
    }

    /// Candidates for reconciliation (spec §4.6): non-terminal, broker-known,
    /// younger than `max_age_hours`, batched to `limit`.
    pub fn list_non_terminal_for_reconciliation(&self, max_age_hours: i64, limit: i64) -> Result<Vec<Order>> {
        self.db.with_conn(|conn| {
            let cutoff = (Utc::now() - chrono::Duration::hours(max_age_hours)).to_rfc3339();
            let mut stmt = conn.prepare(
                "SELECT * FROM orders \
                 WHERE status IN ('PENDING','SUBMITTED','OPEN','TRIGGER_PENDING') \
                 AND broker_order_id IS NOT NULL AND created_at >= ?1 \
                 ORDER BY trading_account_id, created_at ASC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![cutoff, limit], row_to_order)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to list reconciliation candidates")?;
            Ok(rows)
        })
    }

    /// Cancels every non-terminal order for an account (optionally narrowed
    /// to one placing user), returning each order's id and prior status so
    /// the caller can append one audit row per order (spec §4.8). Runs
    /// inside the caller's transaction so the whole event handles atomically.
    pub fn cancel_non_terminal_in_txn(
        txn: &rusqlite::Transaction<'_>,
        trading_account_id: i64,
        user_id: Option<&str>,
    ) -> Result<Vec<(i64, OrderStatus)>> {
        let now = Utc::now().to_rfc3339();
        let mut sql = String::from(
            "SELECT id, status FROM orders WHERE trading_account_id = ?1 \
             AND status IN ('PENDING','SUBMITTED','OPEN','TRIGGER_PENDING')",
        );
        if user_id.is_some() {
            sql.push_str(" AND user_id = ?2");
        }
        let affected: Vec<(i64, OrderStatus)> = {
            let mut stmt = txn.prepare(&sql)?;
            let rows: rusqlite::Result<Vec<(i64, String)>> = if let Some(uid) = user_id {
                stmt.query_map(params![trading_account_id, uid], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect()
            } else {
                stmt.query_map(params![trading_account_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect()
            };
            rows.context("failed to select orders for cancellation")?
                .into_iter()
                .map(|(id, status)| (id, OrderStatus::from_str(&status).unwrap_or(OrderStatus::Pending)))
                .collect()
        };

        for (id, _) in &affected {
            txn.execute(
                "UPDATE orders SET status = 'CANCELLED', cancelled_quantity = pending_quantity, \
                 pending_quantity = 0, completed_at = ?1, updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )
            .context("failed to cancel order during account event handling")?;
        }
        Ok(affected)
    }

    /// Applies a drift correction discovered by reconciliation: new status,
    /// filled quantity / average price if the broker reported them, and
    /// `completed_at` if the new status is terminal.
    pub fn apply_reconciliation_update(
        txn: &rusqlite::Transaction<'_>,
        order_id: i64,
        new_status: OrderStatus,
        filled_quantity: Option<i64>,
        average_price: Option<rust_decimal::Decimal>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let order: Order = txn
            .query_row("SELECT * FROM orders WHERE id = ?1", params![order_id], row_to_order)
            .context("order not found during reconciliation update")?;
        let filled = filled_quantity.unwrap_or(order.filled_quantity);
        let pending = (order.quantity - filled - order.cancelled_quantity).max(0);
        let completed_at = new_status.is_terminal().then(|| now.clone());
        txn.execute(
            "UPDATE orders SET status = ?1, filled_quantity = ?2, pending_quantity = ?3, \
             average_price = COALESCE(?4, average_price), completed_at = COALESCE(?5, completed_at), \
             updated_at = ?6 WHERE id = ?7",
            params![
                new_status.as_str(),
                filled,
                pending,
                average_price.map(|p| p.to_string()),
                completed_at,
                now,
                order_id,
            ],
        )
        .context("failed to apply reconciliation update")?;
        Ok(())
    }
}

fn transaction_type_str(t: TransactionType) -> &'static str {
    match t {
        TransactionType::Buy => "BUY",
        TransactionType::Sell => "SELL",
    }
}

fn order_type_str(t: OrderType) -> &'static str {
    match t {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
        OrderType::Sl => "SL",
        OrderType::SlM => "SL-M",
    }
}

fn product_type_str(t: ProductType) -> &'static str {
    match t {
        ProductType::CNC => "CNC",
        ProductType::MIS => "MIS",
        ProductType::NRML => "NRML",
    }
}

fn variety_str(v: OrderVariety) -> &'static str {
    match v {
        OrderVariety::Regular => "regular",
        OrderVariety::Amo => "amo",
        OrderVariety::Iceberg => "iceberg",
        OrderVariety::Auction => "auction",
    }
}

impl OrderSource {
    fn as_db_str(self) -> &'static str {
        match self {
            OrderSource::Manual => "manual",
            OrderSource::Script => "script",
            OrderSource::External => "external",
            OrderSource::BrokerDirect => "broker_direct",
        }
    }
}

fn row_to_order(row: &Row) -> rusqlite::Result<Order> {
    let parse_decimal = |s: Option<String>| s.and_then(|s| s.parse().ok());
    let parse_dt = |s: Option<String>| {
        s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    };

    Ok(Order {
        id: row.get("id")?,
        broker_order_id: row.get("broker_order_id")?,
        user_id: row.get("user_id")?,
        trading_account_id: row.get("trading_account_id")?,
        strategy_id: row.get("strategy_id")?,
        portfolio_id: row.get("portfolio_id")?,
        execution_id: row.get("execution_id")?,
        position_id: row.get("position_id")?,
        source: parse_source(&row.get::<_, String>("source")?),
        symbol: row.get("symbol")?,
        exchange: row.get("exchange")?,
        transaction_type: parse_transaction_type(&row.get::<_, String>("transaction_type")?),
        order_type: parse_order_type(&row.get::<_, String>("order_type")?),
        product_type: parse_product_type(&row.get::<_, String>("product_type")?),
        variety: parse_variety(&row.get::<_, String>("variety")?),
        quantity: row.get("quantity")?,
        filled_quantity: row.get("filled_quantity")?,
        pending_quantity: row.get("pending_quantity")?,
        cancelled_quantity: row.get("cancelled_quantity")?,
        price: parse_decimal(row.get("price")?),
        trigger_price: parse_decimal(row.get("trigger_price")?),
        average_price: parse_decimal(row.get("average_price")?),
        validity: row.get("validity")?,
        disclosed_quantity: row.get("disclosed_quantity")?,
        status: OrderStatus::from_str(&row.get::<_, String>("status")?).unwrap_or(OrderStatus::Pending),
        status_message: row.get("status_message")?,
        broker_tag: row.get("broker_tag")?,
        risk_check_passed: row.get::<_, i64>("risk_check_passed")? != 0,
        created_at: parse_dt(row.get("created_at")?).unwrap_or_else(Utc::now),
        updated_at: parse_dt(row.get("updated_at")?).unwrap_or_else(Utc::now),
        submitted_at: parse_dt(row.get("submitted_at")?),
        exchange_at: parse_dt(row.get("exchange_at")?),
        completed_at: parse_dt(row.get("completed_at")?),
    })
}

fn parse_source(s: &str) -> OrderSource {
    match s {
        "script" => OrderSource::Script,
        "external" => OrderSource::External,
        "broker_direct" => OrderSource::BrokerDirect,
        _ => OrderSource::Manual,
    }
}

fn parse_transaction_type(s: &str) -> TransactionType {
    match s {
        "SELL" => TransactionType::Sell,
        _ => TransactionType::Buy,
    }
}

fn parse_order_type(s: &str) -> OrderType {
    match s {
        "MARKET" => OrderType::Market,
        "SL" => OrderType::Sl,
        "SL-M" => OrderType::SlM,
        _ => OrderType::Limit,
    }
}

fn parse_product_type(s: &str) -> ProductType {
    match s {
        "MIS" => ProductType::MIS,
        "NRML" => ProductType::NRML,
        _ => ProductType::CNC,
    }
}

fn parse_variety(s: &str) -> OrderVariety {
    match s {
        "amo" => OrderVariety::Amo,
        "iceberg" => OrderVariety::Iceberg,
        "auction" => OrderVariety::Auction,
        _ => OrderVariety::Regular,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn inserts_and_reads_back_a_pending_order() {
        let db = Pool::open_in_memory().unwrap();
        let repo = OrderRepo::new(db.clone());

        let id = db
            .with_transaction(|txn| {
                OrderRepo::insert_pending(
                    txn,
                    "user-1",
                    1,
                    Some(42),
                    None,
                    None,
                    OrderSource::Manual,
                    "RELIANCE",
                    "NSE",
                    TransactionType::Buy,
                    OrderType::Limit,
                    ProductType::CNC,
                    OrderVariety::Regular,
                    10,
                    Some(dec!(2500)),
                    None,
                    None,
                    "DAY",
                    None,
                    None,
                )
            })
            .unwrap();

        let order = repo.get(id).unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.pending_quantity, 10);
        assert!(order.quantity_invariant_holds());
    }

    #[test]
    fn mark_submitted_sets_broker_order_id() {
        let db = Pool::open_in_memory().unwrap();
        let repo = OrderRepo::new(db.clone());
        let id = db
            .with_transaction(|txn| {
                OrderRepo::insert_pending(
                    txn, "u", 1, None, None, None, OrderSource::Manual, "TCS", "NSE",
                    TransactionType::Buy, OrderType::Market, ProductType::MIS, OrderVariety::Regular,
                    5, None, None, None, "DAY", None, None,
                )
            })
            .unwrap();
        db.with_transaction(|txn| OrderRepo::mark_submitted(txn, id, "BRK123")).unwrap();

        let order = repo.get(id).unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Submitted);
        assert_eq!(order.broker_order_id.as_deref(), Some("BRK123"));
    }
}
