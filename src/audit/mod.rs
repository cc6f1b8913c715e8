//! Append-only order state-transition log (spec §4.1, §4.2: every status
//! change is recorded, never mutated or deleted).

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::params;

use crate::db::Pool;
use crate::domain::OrderStatus;

pub struct AuditLog {
    db: Pool,
}

/// Who or what caused a transition, recorded verbatim alongside the row.
pub enum Actor<'a> {
    User(&'a str),
    System(&'a str),
}

impl AuditLog {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }

    /// Records one transition outside any caller-managed transaction.
    pub fn record(
        &self,
        order_id: i64,
        old_status: Option<OrderStatus>,
        new_status: OrderStatus,
        actor: Actor<'_>,
        reason: Option<&str>,
    ) -> Result<()> {
        self.db.with_conn(|conn| {
            insert(conn, order_id, old_status, new_status, actor, reason)
        })
    }

    /// Same insert run against a transaction already owned by the caller,
    /// so the history row commits atomically with the order update it
    /// describes (spec §4.1: state transitions and their audit row are
    /// written in the same unit of work).
    pub fn record_in_txn(
        txn: &rusqlite::Transaction<'_>,
        order_id: i64,
        old_status: Option<OrderStatus>,
        new_status: OrderStatus,
        actor: Actor<'_>,
        reason: Option<&str>,
    ) -> Result<()> {
        insert(txn, order_id, old_status, new_status, actor, reason)
    }

    pub fn history_for_order(&self, order_id: i64) -> Result<Vec<AuditEntry>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, order_id, old_status, new_status, changed_by_user_id, \
                        changed_by_system, reason, changed_at \
                 FROM order_state_history WHERE order_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![order_id], |row| {
                    Ok(AuditEntry {
                        id: row.get(0)?,
                        order_id: row.get(1)?,
                        old_status: row.get(2)?,
                        new_status: row.get(3)?,
                        changed_by_user_id: row.get(4)?,
                        changed_by_system: row.get(5)?,
                        reason: row.get(6)?,
                        changed_at: row.get(7)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to read order state history")?;
            Ok(rows)
        })
    }
}

fn insert(
    conn: &rusqlite::Connection,
    order_id: i64,
    old_status: Option<OrderStatus>,
    new_status: OrderStatus,
    actor: Actor<'_>,
    reason: Option<&str>,
) -> Result<()> {
    let (changed_by_user_id, changed_by_system) = match actor {
        Actor::User(id) => (Some(id), None),
        Actor::System(label) => (None, Some(label)),
    };
    conn.execute(
        "INSERT INTO order_state_history \
         (order_id, old_status, new_status, changed_by_user_id, changed_by_system, reason, changed_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            order_id,
            old_status.map(|s| s.as_str()),
            new_status.as_str(),
            changed_by_user_id,
            changed_by_system,
            reason,
            Utc::now().to_rfc3339(),
        ],
    )
    .context("failed to append order state history")?;
    Ok(())
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub order_id: i64,
    pub old_status: Option<String>,
    pub new_status: String,
    pub changed_by_user_id: Option<String>,
    pub changed_by_system: Option<String>,
    pub reason: Option<String>,
    pub changed_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_order(db: &Pool) -> i64 {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO orders (user_id, trading_account_id, symbol, exchange, transaction_type, order_type, product_type, variety, quantity, filled_quantity, pending_quantity, cancelled_quantity, status, created_at, updated_at) VALUES ('u','1','RELIANCE','NSE','BUY','LIMIT','CNC','regular',10,0,10,0,'PENDING','2024-01-01T00:00:00Z','2024-01-01T00:00:00Z')",
                [],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .unwrap()
    }

    #[test]
    fn records_and_reads_back_history_in_order() {
        let db = Pool::open_in_memory().unwrap();
        let order_id = seed_order(&db);
        let log = AuditLog::new(db);

        log.record(order_id, None, OrderStatus::Pending, Actor::System("engine"), None)
            .unwrap();
        log.record(
            order_id,
            Some(OrderStatus::Pending),
            OrderStatus::Submitted,
            Actor::System("engine"),
            Some("broker ack"),
        )
        .unwrap();

        let history = log.history_for_order(order_id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].new_status, "PENDING");
        assert_eq!(history[1].old_status.as_deref(), Some("PENDING"));
        assert_eq!(history[1].new_status, "SUBMITTED");
    }
}
