//! Coalesces the tick broadcast into a per-instrument batch (spec §4.5).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, warn};

use crate::clients::MarketDataClient;
use crate::positions::PositionRepo;

#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub instrument_token: i64,
    pub last_price: Decimal,
}

pub type TickBatch = Arc<Mutex<HashMap<i64, Tick>>>;

pub struct TickListener {
    rx: broadcast::Receiver<Tick>,
    batch: TickBatch,
    batch_size: usize,
    flush_notify: Arc<Notify>,
}

impl TickListener {
    pub fn new(
        rx: broadcast::Receiver<Tick>,
        batch: TickBatch,
        batch_size: usize,
        flush_notify: Arc<Notify>,
    ) -> Self {
        Self {
            rx,
            batch,
            batch_size,
            flush_notify,
        }
    }

    /// Rebuilds the subscription set from open positions and asks the
    /// market-data service to refresh its global list (spec §4.5 startup
    /// recovery).
    pub async fn recover_subscriptions(
        repo: &PositionRepo,
        trading_account_ids: &[i64],
        market_data: &MarketDataClient,
    ) -> anyhow::Result<Vec<i64>> {
        let mut tokens = Vec::new();
        for account_id in trading_account_ids {
            for position in repo.list_open(*account_id)? {
                if let Some(token) = position.instrument_token {
                    tokens.push(token);
                }
            }
        }
        tokens.sort_unstable();
        tokens.dedup();
        market_data.refresh_subscriptions().await?;
        debug!(count = tokens.len(), "recovered tick subscriptions from open positions");
        Ok(tokens)
    }

    /// Drains the broadcast channel until it closes or lags past recovery,
    /// inserting the latest tick per instrument into the shared batch.
    pub async fn run(mut self) {
        loop {
            match self.rx.recv().await {
                Ok(tick) => {
                    let len = {
                        let mut batch = self.batch.lock();
                        batch.insert(tick.instrument_token, tick);
                        batch.len()
                    };
                    if len >= self.batch_size {
                        self.flush_notify.notify_one();
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "tick listener lagged, latest-per-instrument batching absorbs the gap");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("tick broadcast channel closed, listener exiting");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn batches_latest_tick_per_instrument() {
        let (tx, rx) = broadcast::channel(16);
        let batch: TickBatch = Arc::new(Mutex::new(HashMap::new()));
        let notify = Arc::new(Notify::new());
        let listener = TickListener::new(rx, batch.clone(), 100, notify);
        let handle = tokio::spawn(listener.run());

        tx.send(Tick { instrument_token: 1, last_price: dec!(100) }).unwrap();
        tx.send(Tick { instrument_token: 1, last_price: dec!(101) }).unwrap();
        tx.send(Tick { instrument_token: 2, last_price: dec!(50) }).unwrap();
        drop(tx);
        handle.await.unwrap();

        let batch = batch.lock();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[&1].last_price, dec!(101));
    }
}
