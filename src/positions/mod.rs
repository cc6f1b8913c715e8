//! Position tracking: weighted-average fills, brokerage/tax charges, and
//! realized/unrealized P&L (spec §3, §4.4, §4.5).

pub mod brokerage;
pub mod pnl;
pub mod repo;
pub mod strategy_pnl;
pub mod trade_repo;
pub mod tracker;

pub use repo::{ExecutionPnlSummary, PositionRepo};
pub use strategy_pnl::{StrategyPnlMetrics, StrategyPnlRepo};
pub use trade_repo::TradeRepo;
pub use tracker::{PositionTracker, SubscriptionEvent};
