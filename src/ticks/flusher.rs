//! Periodic drain of the tick batch into `positions.apply_tick_to_instrument`
//! (spec §4.5).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::positions::PositionRepo;

use super::listener::TickBatch;

pub struct TickFlusher {
    repo: PositionRepo,
    batch: TickBatch,
    interval: Duration,
    flush_notify: Arc<Notify>,
}

impl TickFlusher {
    pub fn new(repo: PositionRepo, batch: TickBatch, interval: Duration, flush_notify: Arc<Notify>) -> Self {
        Self {
            repo,
            batch,
            interval,
            flush_notify,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.flush_notify.notified() => {}
            }
            self.flush_once();
        }
    }

    /// Drains the batch and applies one UPDATE per instrument. Public so
    /// callers (tests, graceful shutdown) can force a final flush.
    pub fn flush_once(&self) -> usize {
        let drained: Vec<_> = {
            let mut batch = self.batch.lock();
            batch.drain().collect()
        };
        let count = drained.len();
        for (instrument_token, tick) in drained {
            match self.repo.apply_tick_to_instrument(instrument_token, tick.last_price) {
                Ok(rows) => debug!(instrument_token, rows, "flushed tick to positions"),
                Err(err) => warn!(instrument_token, %err, "failed to apply tick to positions"),
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Pool;
    use crate::domain::ProductType;
    use crate::ticks::listener::Tick;
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    #[test]
    fn flush_once_applies_batched_ticks_and_drains() {
        let db = Pool::open_in_memory().unwrap();
        let repo = PositionRepo::new(db);
        let day = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        repo.insert(1, "RELIANCE", "NSE", ProductType::CNC, day, Some(100), None, None).unwrap();

        let batch: TickBatch = Arc::new(Mutex::new(HashMap::new()));
        batch.lock().insert(100, Tick { instrument_token: 100, last_price: dec!(2550) });
        let flusher = TickFlusher::new(repo, batch.clone(), Duration::from_millis(500), Arc::new(Notify::new()));

        let flushed = flusher.flush_once();
        assert_eq!(flushed, 1);
        assert!(batch.lock().is_empty());
    }
}
