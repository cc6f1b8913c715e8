//! `GET /api/v1/accounts/resolve/{trading_account_id}` and
//! `GET /api/v1/tokens/by-trading-account/{id}` (spec §6 outbound integrations).
//!
//! Open Question (d): only the async account-resolution path is implemented;
//! no synchronous variant exists anywhere in this crate.

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedAccount {
    pub account_nickname: String,
    pub api_key: String,
    pub broker: String,
    pub segment: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub api_key: String,
}

pub struct TokenAccountClient {
    http: reqwest::Client,
    base_url: String,
    internal_api_key: String,
}

impl TokenAccountClient {
    pub fn new(http: reqwest::Client, base_url: String, internal_api_key: String) -> Self {
        Self {
            http,
            base_url,
            internal_api_key,
        }
    }

    pub async fn resolve_account(&self, trading_account_id: i64) -> Result<ResolvedAccount> {
        let url = format!("{}/api/v1/accounts/resolve/{trading_account_id}", self.base_url);
        let response = self
            .http
            .get(url)
            .header("X-Internal-API-Key", &self.internal_api_key)
            .send()
            .await
            .context("token-account service request failed")?
            .error_for_status()
            .context("token-account service returned an error status")?;
        response
            .json::<ResolvedAccount>()
            .await
            .context("failed to parse account-resolve response")
    }

    pub async fn fetch_access_token(&self, trading_account_id: i64) -> Result<AccessToken> {
        let url = format!(
            "{}/api/v1/tokens/by-trading-account/{trading_account_id}",
            self.base_url
        );
        let response = self
            .http
            .get(url)
            .header("X-Internal-API-Key", &self.internal_api_key)
            .send()
            .await
            .context("token-account service request failed")?
            .error_for_status()
            .context("token-account service returned an error status")?;
        response
            .json::<AccessToken>()
            .await
            .context("failed to parse token response")
    }
}
