//! SQLite persistence tier standing in for the relational database in §6.
//!
//! One logical schema (Open Question a): every table lives in a single
//! `SCHEMA_SQL` constant applied to one connection, grounded on the
//! teacher's `signals/db_storage.rs` convention (WAL mode, `prepare_cached`,
//! `Arc<parking_lot::Mutex<Connection>>` since `rusqlite::Connection` is
//! `!Sync`).

mod schema;

pub use schema::SCHEMA_SQL;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::Arc;

#[derive(Clone)]
pub struct Pool {
    conn: Arc<Mutex<Connection>>,
}

impl Pool {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {path}"))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL mode")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with exclusive access to the underlying connection. Callers
    /// must not hold the returned guard across an `.await` point.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock();
        f(&guard)
    }

    /// Runs `f` inside a `BEGIN IMMEDIATE` transaction, committing on `Ok`
    /// and rolling back on `Err`, per the teacher's
    /// `signals/db_storage.rs::store_batch` convention.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&rusqlite::Transaction) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        let tx = guard
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .context("failed to begin transaction")?;
        match f(&tx) {
            Ok(value) => {
                tx.commit().context("failed to commit transaction")?;
                Ok(value)
            }
            Err(err) => {
                let _ = tx.rollback();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_and_applies_schema() {
        let pool = Pool::open_in_memory().unwrap();
        pool.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='orders'",
                [],
                |row| row.get(0),
            )?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let pool = Pool::open_in_memory().unwrap();
        let result: Result<()> = pool.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO orders (user_id, trading_account_id, symbol, exchange, transaction_type, order_type, product_type, variety, quantity, filled_quantity, pending_quantity, cancelled_quantity, status, created_at, updated_at) VALUES ('u','1','RELIANCE','NSE','BUY','LIMIT','CNC','regular',10,0,10,0,'PENDING','2024-01-01T00:00:00Z','2024-01-01T00:00:00Z')",
                [],
            )?;
            anyhow::bail!("forced failure")
        });
        assert!(result.is_err());
        pool.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT count(*) FROM orders", [], |row| row.get(0))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }
}
