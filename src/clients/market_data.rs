//! `POST /admin/subscriptions/refresh` (spec §6, §4.9).

use anyhow::{Context, Result};

pub struct MarketDataClient {
    http: reqwest::Client,
    base_url: String,
}

impl MarketDataClient {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    /// Asks the market-data service to re-read its active subscription set.
    /// Callers batch multiple Subscribe/Unsubscribe intents into a single
    /// call after a bulk sync (spec §4.9).
    pub async fn refresh_subscriptions(&self) -> Result<()> {
        let url = format!("{}/admin/subscriptions/refresh", self.base_url);
        self.http
            .post(url)
            .send()
            .await
            .context("market-data refresh request failed")?
            .error_for_status()
            .context("market-data service returned an error status")?;
        Ok(())
    }
}
