//! `/internal/*` routes (spec §6): internal-API-key gated, no end-user
//! ownership checks — callers are trusted operator/service processes.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::accounts::AccountEvent;
use crate::domain::SyncTier;
use crate::error::{AppError, AppResult};
use crate::positions::ExecutionPnlSummary;
use crate::ratelimit::AccountRateLimitStats;
use crate::reconcile::ReconciliationStats;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AccountEventPayload {
    AccountCreated {
        trading_account_id: i64,
        correlation_id: String,
    },
    AccountDeactivated {
        trading_account_id: i64,
        correlation_id: String,
    },
    AccountDeleted {
        trading_account_id: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
        correlation_id: String,
    },
    MembershipRevoked {
        trading_account_id: i64,
        member_user_id: String,
        correlation_id: String,
    },
}

impl From<AccountEventPayload> for AccountEvent {
    fn from(payload: AccountEventPayload) -> Self {
        match payload {
            AccountEventPayload::AccountCreated { trading_account_id, correlation_id } => {
                AccountEvent::AccountCreated { trading_account_id, correlation_id }
            }
            AccountEventPayload::AccountDeactivated { trading_account_id, correlation_id } => {
                AccountEvent::AccountDeactivated { trading_account_id, correlation_id }
            }
            AccountEventPayload::AccountDeleted { trading_account_id, timestamp, correlation_id } => {
                AccountEvent::AccountDeleted { trading_account_id, timestamp, correlation_id }
            }
            AccountEventPayload::MembershipRevoked { trading_account_id, member_user_id, correlation_id } => {
                AccountEvent::MembershipRevoked { trading_account_id, member_user_id, correlation_id }
            }
        }
    }
}

/// Replays one account-lifecycle event on demand (spec §4.8); normally
/// these arrive off the event bus, but operators can re-drive a missed or
/// failed one here.
pub async fn reload_accounts(
    State(state): State<AppState>,
    Json(payload): Json<AccountEventPayload>,
) -> AppResult<Json<serde_json::Value>> {
    state.accounts.handle(&payload.into()).map_err(AppError::Internal)?;
    Ok(Json(serde_json::json!({"status": "ok"})))
}

pub async fn reconcile_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> AppResult<Json<ReconciliationStats>> {
    let order = state
        .order_repo
        .get(order_id)
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
    let stats = state
        .reconcile
        .poll_account(order.trading_account_id)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct PnlCalculateRequest {
    pub execution_id: String,
    pub trading_day: NaiveDate,
}

pub async fn pnl_calculate(
    State(state): State<AppState>,
    Json(req): Json<PnlCalculateRequest>,
) -> AppResult<Json<ExecutionPnlSummary>> {
    Ok(Json(
        state
            .positions
            .execution_pnl_summary(&req.execution_id, req.trading_day)
            .map_err(AppError::Internal)?,
    ))
}

pub async fn rate_limit_stats(
    State(state): State<AppState>,
) -> Json<std::collections::HashMap<i64, AccountRateLimitStats>> {
    Json(state.rate_limiter.manager.all_stats())
}

#[derive(Debug, Serialize)]
pub struct TierSummary {
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
    pub dormant: usize,
}

pub async fn tiers_summary(State(state): State<AppState>) -> AppResult<Json<TierSummary>> {
    let summary = TierSummary {
        hot: state.tiers.list_by_tier(SyncTier::Hot).map_err(AppError::Internal)?.len(),
        warm: state.tiers.list_by_tier(SyncTier::Warm).map_err(AppError::Internal)?.len(),
        cold: state.tiers.list_by_tier(SyncTier::Cold).map_err(AppError::Internal)?.len(),
        dormant: state.tiers.list_by_tier(SyncTier::Dormant).map_err(AppError::Internal)?.len(),
    };
    Ok(Json(summary))
}
