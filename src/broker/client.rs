use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clients::TokenAccountClient;
use crate::domain::{OrderType, ProductType, TransactionType};

#[derive(Debug, Clone, Serialize)]
pub struct BrokerOrderRequest {
    pub symbol: String,
    pub exchange: String,
    pub transaction_type: TransactionType,
    pub order_type: OrderType,
    pub product_type: ProductType,
    pub quantity: i64,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub disclosed_quantity: Option<i64>,
    pub validity: String,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerOrderResponse {
    pub broker_order_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerOrderView {
    pub broker_order_id: String,
    pub status: String,
    pub filled_quantity: i64,
    pub average_price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokerGttRequest {
    pub gtt_type: String,
    pub symbol: String,
    pub exchange: String,
    pub trigger_prices: Vec<Decimal>,
    pub last_price: Decimal,
    pub orders: Vec<crate::domain::GttOrderLeg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerGttResponse {
    pub broker_gtt_id: String,
}

/// Abstracts the live broker HTTP API so tests substitute a mock.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    async fn place_order(&self, req: &BrokerOrderRequest) -> Result<BrokerOrderResponse>;
    async fn modify_order(&self, broker_order_id: &str, req: &BrokerOrderRequest) -> Result<()>;
    async fn cancel_order(&self, broker_order_id: &str) -> Result<()>;
    async fn list_orders(&self) -> Result<Vec<BrokerOrderView>>;
    async fn place_gtt(&self, req: &BrokerGttRequest) -> Result<BrokerGttResponse>;
    async fn modify_gtt(&self, broker_gtt_id: &str, req: &BrokerGttRequest) -> Result<()>;
    async fn cancel_gtt(&self, broker_gtt_id: &str) -> Result<()>;
}

/// Error text heuristics the original broker surfaces for expired sessions
/// (spec §4.3: "any auth-classified error from broker").
fn looks_like_auth_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["token", "session", "api_key", "unauthorized"]
        .iter()
        .any(|needle| lower.contains(needle))
}

struct TokenState {
    access_token: String,
    api_key: String,
}

/// One logical client per trading account. Resolves account config on first
/// use and caches it for the process lifetime; fetches and transparently
/// refreshes access tokens on auth-classified broker errors (spec §4.3).
pub struct BrokerClient {
    http: reqwest::Client,
    base_url: String,
    trading_account_id: i64,
    token_account_client: Arc<TokenAccountClient>,
    token: RwLock<Option<TokenState>>,
    timeout: std::time::Duration,
}

impl BrokerClient {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        trading_account_id: i64,
        token_account_client: Arc<TokenAccountClient>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            http,
            base_url,
            trading_account_id,
            token_account_client,
            token: RwLock::new(None),
            timeout,
        }
    }

    async fn ensure_token(&self) -> Result<()> {
        if self.token.read().is_some() {
            return Ok(());
        }
        self.refresh_token().await
    }

    async fn refresh_token(&self) -> Result<()> {
        let access = self
            .token_account_client
            .fetch_access_token(self.trading_account_id)
            .await
            .context("failed to fetch broker access token")?;
        *self.token.write() = Some(TokenState {
            access_token: access.access_token,
            api_key: access.api_key,
        });
        Ok(())
    }

    fn auth_headers(&self) -> Result<(String, String)> {
        let guard = self.token.read();
        let state = guard.as_ref().context("broker token not initialized")?;
        Ok((state.api_key.clone(), state.access_token.clone()))
    }

    /// Builds and sends one request, refreshing the token and retrying once
    /// if the broker rejects it with an auth-classified error (spec §4.3:
    /// "any auth-classified error from broker").
    async fn send_with_auth_retry(
        &self,
        build: impl Fn(&reqwest::Client, &str, &str) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        self.ensure_token().await?;

        for attempt in 0..2 {
            let (api_key, access_token) = self.auth_headers()?;
            let response = build(&self.http, &api_key, &access_token)
                .timeout(self.timeout)
                .send()
                .await
                .context("broker request failed")?;

            if response.status().is_client_error() || response.status().is_server_error() {
                let body = response.text().await.unwrap_or_default();
                if attempt == 0 && looks_like_auth_error(&body) {
                    self.refresh_token().await?;
                    continue;
                }
                anyhow::bail!("broker rejected request: {body}");
            }

            return Ok(response);
        }

        unreachable!("loop always returns or bails within two attempts")
    }
}

#[async_trait]
impl BrokerApi for BrokerClient {
    async fn place_order(&self, req: &BrokerOrderRequest) -> Result<BrokerOrderResponse> {
        let url = format!("{}/orders", self.base_url);
        let response = self
            .send_with_auth_retry(|http, api_key, access_token| {
                http.post(&url)
                    .header("X-Api-Key", api_key)
                    .header("Authorization", format!("token {access_token}"))
                    .json(req)
            })
            .await?;
        response
            .json::<BrokerOrderResponse>()
            .await
            .context("failed to parse broker place-order response")
    }

    async fn modify_order(&self, broker_order_id: &str, req: &BrokerOrderRequest) -> Result<()> {
        let url = format!("{}/orders/{broker_order_id}", self.base_url);
        self.send_with_auth_retry(|http, api_key, access_token| {
            http.put(&url)
                .header("X-Api-Key", api_key)
                .header("Authorization", format!("token {access_token}"))
                .json(req)
        })
        .await?;
        Ok(())
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<()> {
        let url = format!("{}/orders/{broker_order_id}", self.base_url);
        self.send_with_auth_retry(|http, api_key, access_token| {
            http.delete(&url)
                .header("X-Api-Key", api_key)
                .header("Authorization", format!("token {access_token}"))
        })
        .await?;
        Ok(())
    }

    async fn list_orders(&self) -> Result<Vec<BrokerOrderView>> {
        let url = format!("{}/orders", self.base_url);
        let response = self
            .send_with_auth_retry(|http, api_key, access_token| {
                http.get(&url)
                    .header("X-Api-Key", api_key)
                    .header("Authorization", format!("token {access_token}"))
            })
            .await?;
        response
            .json::<Vec<BrokerOrderView>>()
            .await
            .context("failed to parse broker list-orders response")
    }

    async fn place_gtt(&self, req: &BrokerGttRequest) -> Result<BrokerGttResponse> {
        let url = format!("{}/gtt/triggers", self.base_url);
        let response = self
            .send_with_auth_retry(|http, api_key, access_token| {
                http.post(&url)
                    .header("X-Api-Key", api_key)
                    .header("Authorization", format!("token {access_token}"))
                    .json(req)
            })
            .await?;
        response
            .json::<BrokerGttResponse>()
            .await
            .context("failed to parse broker place-gtt response")
    }

    async fn modify_gtt(&self, broker_gtt_id: &str, req: &BrokerGttRequest) -> Result<()> {
        let url = format!("{}/gtt/triggers/{broker_gtt_id}", self.base_url);
        self.send_with_auth_retry(|http, api_key, access_token| {
            http.put(&url)
                .header("X-Api-Key", api_key)
                .header("Authorization", format!("token {access_token}"))
                .json(req)
        })
        .await?;
        Ok(())
    }

    async fn cancel_gtt(&self, broker_gtt_id: &str) -> Result<()> {
        let url = format!("{}/gtt/triggers/{broker_gtt_id}", self.base_url);
        self.send_with_auth_retry(|http, api_key, access_token| {
            http.delete(&url)
                .header("X-Api-Key", api_key)
                .header("Authorization", format!("token {access_token}"))
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth_errors_by_message() {
        assert!(looks_like_auth_error("Invalid session token"));
        assert!(looks_like_auth_error("api_key mismatch"));
        assert!(!looks_like_auth_error("insufficient margin"));
    }
}
