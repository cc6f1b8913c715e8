//! `POST /api/v1/permissions/check` (spec §6). Fast path uses the JWT
//! `acct_ids` claim if present instead of calling out.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct PermissionCheckRequest<'a> {
    user_id: &'a str,
    trading_account_id: i64,
    required_permissions: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionCheckResponse {
    pub has_access: bool,
    pub access_level: String,
    pub permissions: Vec<String>,
}

pub struct PermissionClient {
    http: reqwest::Client,
    base_url: String,
    internal_api_key: String,
}

impl PermissionClient {
    pub fn new(http: reqwest::Client, base_url: String, internal_api_key: String) -> Self {
        Self {
            http,
            base_url,
            internal_api_key,
        }
    }

    pub async fn check(
        &self,
        user_id: &str,
        trading_account_id: i64,
        required_permissions: &[String],
    ) -> Result<PermissionCheckResponse> {
        let url = format!("{}/api/v1/permissions/check", self.base_url);
        let response = self
            .http
            .post(url)
            .header("X-Internal-API-Key", &self.internal_api_key)
            .json(&PermissionCheckRequest {
                user_id,
                trading_account_id,
                required_permissions,
            })
            .send()
            .await
            .context("permission service request failed")?
            .error_for_status()
            .context("permission service returned an error status")?;

        response
            .json::<PermissionCheckResponse>()
            .await
            .context("failed to parse permission-check response")
    }

    /// Fast path: if the caller's JWT already carries `accessible_account_ids`
    /// (the `acct_ids` claim), skip the network round-trip entirely.
    pub fn fast_path(accessible_account_ids: &[i64], trading_account_id: i64) -> Option<bool> {
        if accessible_account_ids.is_empty() {
            None
        } else {
            Some(accessible_account_ids.contains(&trading_account_id))
        }
    }
}
