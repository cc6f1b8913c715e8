//! Strategy-level daily P&L rollup (spec §11 supplement #2): aggregates
//! executions into `strategy_pnl_metrics`, complementing the
//! execution-level attribution already carried on `Order`/`Trade`.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;

use crate::db::Pool;

pub struct StrategyPnlRepo {
    db: Pool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StrategyPnlMetrics {
    pub strategy_id: i64,
    pub trading_day: String,
    pub day_pnl: Decimal,
    pub cumulative_pnl: Decimal,
    pub win_rate: Decimal,
    pub max_drawdown: Decimal,
    pub roi_percent: Decimal,
    pub max_consecutive_losses: i64,
    pub trade_count: i64,
}

impl StrategyPnlRepo {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }

    /// Recomputes today's rollup for `strategy_id` from every open/closed
    /// position it owns for the trading day, upserting the row.
    pub fn recompute_for_day(&self, strategy_id: i64, trading_day: &str) -> Result<StrategyPnlMetrics> {
        self.db.with_conn(|conn| {
            let (day_pnl, trade_count): (String, i64) = conn
                .query_row(
                    "SELECT COALESCE(SUM(net_pnl), '0'), COUNT(*) FROM positions \
                     WHERE strategy_id = ?1 AND trading_day = ?2",
                    rusqlite::params![strategy_id, trading_day],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .context("failed to aggregate strategy day pnl")?;
            let day_pnl: Decimal = day_pnl.parse().unwrap_or(Decimal::ZERO);

            let wins: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM positions WHERE strategy_id = ?1 AND trading_day = ?2 AND net_pnl > 0",
                    rusqlite::params![strategy_id, trading_day],
                    |row| row.get(0),
                )
                .unwrap_or(0);
            let win_rate = if trade_count > 0 {
                Decimal::from(wins) / Decimal::from(trade_count)
            } else {
                Decimal::ZERO
            };

            let previous_cumulative: String = conn
                .query_row(
                    "SELECT cumulative_pnl FROM strategy_pnl_metrics \
                     WHERE strategy_id = ?1 AND trading_day < ?2 ORDER BY trading_day DESC LIMIT 1",
                    rusqlite::params![strategy_id, trading_day],
                    |row| row.get(0),
                )
                .unwrap_or_else(|_| "0".to_string());
            let previous_cumulative: Decimal = previous_cumulative.parse().unwrap_or(Decimal::ZERO);
            let cumulative_pnl = previous_cumulative + day_pnl;
            let max_drawdown = previous_cumulative.min(cumulative_pnl).min(Decimal::ZERO).abs();

            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO strategy_pnl_metrics
                    (strategy_id, trading_day, day_pnl, cumulative_pnl, win_rate, max_drawdown, roi_percent, max_consecutive_losses, trade_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, '0', 0, ?7, ?8)
                 ON CONFLICT(strategy_id, trading_day) DO UPDATE SET
                    day_pnl = excluded.day_pnl,
                    cumulative_pnl = excluded.cumulative_pnl,
                    win_rate = excluded.win_rate,
                    max_drawdown = excluded.max_drawdown,
                    trade_count = excluded.trade_count,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    strategy_id,
                    trading_day,
                    day_pnl.to_string(),
                    cumulative_pnl.to_string(),
                    win_rate.to_string(),
                    max_drawdown.to_string(),
                    trade_count,
                    now,
                ],
            )
            .context("failed to upsert strategy pnl metrics")?;

            Ok(StrategyPnlMetrics {
                strategy_id,
                trading_day: trading_day.to_string(),
                day_pnl,
                cumulative_pnl,
                win_rate,
                max_drawdown,
                roi_percent: Decimal::ZERO,
                max_consecutive_losses: 0,
                trade_count,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recompute_on_empty_day_yields_zero_metrics() {
        let db = Pool::open_in_memory().unwrap();
        let repo = StrategyPnlRepo::new(db);
        let metrics = repo.recompute_for_day(42, "2026-01-05").unwrap();
        assert_eq!(metrics.day_pnl, Decimal::ZERO);
        assert_eq!(metrics.trade_count, 0);
    }
}
