//! Tick fan-out: coalesces the instrument tick stream into a batch and
//! periodically flushes unrealized P&L for every open position it touches
//! (spec §4.5).

pub mod flusher;
pub mod listener;

pub use flusher::TickFlusher;
pub use listener::{Tick, TickBatch, TickListener};
