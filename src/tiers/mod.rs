//! Tier ladder and per-tier polling loops (spec §4.7), modeled on the
//! original `account_tier_service.py` / `tiered_sync_worker.py` split.

pub mod classifier;
pub mod scheduler;

pub use classifier::{AccountActivity, TierClassifier};
pub use scheduler::TierScheduler;
