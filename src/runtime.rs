//! Supervised background task lifecycle (spec §9 "inject, don't import"):
//! starts every long-lived task, and on shutdown waits for them to drain
//! within a bounded grace period before the process exits.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::state::AppState;
use crate::ticks::{Tick, TickBatch, TickFlusher, TickListener};

pub struct Runtime {
    handles: Vec<JoinHandle<()>>,
    shutdown_grace_period: Duration,
}

impl Runtime {
    /// Spawns every background task the service needs and returns a handle
    /// that can later be asked to drain them.
    pub fn start(state: &AppState) -> Self {
        let mut handles = Vec::new();

        let (tick_tx, _) = broadcast::channel::<Tick>(4096);
        let tick_batch: TickBatch = Arc::new(Mutex::new(std::collections::HashMap::new()));
        let flush_notify = Arc::new(Notify::new());

        handles.push(tokio::spawn(tick_redis_bridge(state.config.redis_url.clone(), tick_tx.clone())));

        let listener = TickListener::new(
            tick_tx.subscribe(),
            tick_batch.clone(),
            state.config.operational.tick_batch_size,
            flush_notify.clone(),
        );
        handles.push(tokio::spawn(listener.run()));

        let flusher = TickFlusher::new(
            crate::positions::PositionRepo::new(state.db.clone()),
            tick_batch,
            state.config.operational.tick_batch_interval,
            flush_notify,
        );
        handles.push(tokio::spawn(flusher.run()));

        let reconcile = (*state.reconcile).clone();
        let reconcile_interval = state.config.operational.reconciliation_interval;
        handles.push(tokio::spawn(reconcile.run(reconcile_interval)));

        let scheduler = Arc::new(crate::tiers::TierScheduler::new(
            (*state.tiers).clone(),
            state.reconcile.clone(),
            state.config.operational.tier_batch_size,
            state.config.operational.tier_batch_pause,
        ));
        handles.push(tokio::spawn(scheduler.clone().run_tier(
            crate::domain::SyncTier::Hot,
            state.config.operational.tier_hot_interval,
        )));
        handles.push(tokio::spawn(scheduler.clone().run_tier(
            crate::domain::SyncTier::Warm,
            state.config.operational.tier_warm_interval,
        )));
        handles.push(tokio::spawn(scheduler.run_tier(
            crate::domain::SyncTier::Cold,
            state.config.operational.tier_cold_interval,
        )));

        let subscriptions = state.subscriptions.clone();
        handles.push(tokio::spawn(async move {
            if let Err(err) = subscriptions.recover_on_startup().await {
                warn!(%err, "failed to recover subscriptions on startup");
            }
        }));

        info!(tasks = handles.len(), "background runtime started");

        Self {
            handles,
            shutdown_grace_period: state.config.operational.shutdown_grace_period,
        }
    }

    /// Aborts every background task; called once the HTTP server itself has
    /// finished draining in-flight requests. Tasks are not designed to be
    /// awaited to natural completion (they are infinite loops), so the
    /// grace period bounds how long shutdown waits before forcing it.
    pub async fn shutdown(self) {
        tokio::time::sleep(Duration::from_millis(50).min(self.shutdown_grace_period)).await;
        for handle in &self.handles {
            handle.abort();
        }
        info!("background runtime stopped");
    }
}

/// Subscribes to `ticks:*` on Redis and republishes onto the in-process
/// broadcast channel the listener/flusher consume (spec §6 tick bus:
/// "channel ticks:{instrument_token}, payload either a single tick object
/// or an array").
async fn tick_redis_bridge(redis_url: Option<String>, tx: broadcast::Sender<Tick>) {
    let Some(redis_url) = redis_url else {
        warn!("no REDIS_URL configured, tick bus bridge disabled");
        return;
    };

    loop {
        match run_tick_bridge_once(&redis_url, &tx).await {
            Ok(()) => return,
            Err(err) => {
                warn!(%err, "tick bus bridge disconnected, retrying in 5s");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

async fn run_tick_bridge_once(redis_url: &str, tx: &broadcast::Sender<Tick>) -> anyhow::Result<()> {
    use futures_util::StreamExt;

    let client = redis::Client::open(redis_url)?;
    let mut pubsub = client.get_async_connection().await?.into_pubsub();
    pubsub.psubscribe("ticks:*").await?;

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let channel: String = msg.get_channel_name().to_string();
        let Some(instrument_token) = channel.rsplit(':').next().and_then(|s| s.parse::<i64>().ok()) else {
            continue;
        };
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(_) => continue,
        };
        for tick in parse_tick_payload(instrument_token, &payload) {
            let _ = tx.send(tick);
        }
    }
    Ok(())
}

/// Accepts either a single tick object or an array (spec §6).
fn parse_tick_payload(instrument_token: i64, payload: &str) -> Vec<Tick> {
    #[derive(serde::Deserialize)]
    struct RawTick {
        last_price: rust_decimal::Decimal,
    }

    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    let raws: Vec<RawTick> = if value.is_array() {
        serde_json::from_value(value).unwrap_or_default()
    } else {
        serde_json::from_value(value).map(|t| vec![t]).unwrap_or_default()
    };
    raws.into_iter()
        .map(|r| Tick {
            instrument_token,
            last_price: r.last_price,
        })
        .collect()
}
