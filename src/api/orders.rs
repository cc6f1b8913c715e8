//! `/api/v1/orders` handlers (spec §6), wiring HTTP directly onto
//! `orders::OrderEngine` — no business logic lives here.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::orders::{OrderFilter, PlaceOrderRequest};
use crate::state::AppState;

pub async fn place(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    Json(req): Json<PlaceOrderRequest>,
) -> AppResult<Json<crate::domain::Order>> {
    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let order = state.orders.place(&ctx, req, idempotency_key).await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub symbol: Option<String>,
    pub status: Option<crate::domain::OrderStatus>,
    pub position_id: Option<i64>,
    pub execution_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(q): Query<ListOrdersQuery>,
) -> AppResult<Json<Vec<crate::domain::Order>>> {
    let filter = OrderFilter {
        symbol: q.symbol,
        status: q.status,
        position_id: q.position_id,
        execution_id: q.execution_id,
        limit: q.limit,
        offset: q.offset,
        ..Default::default()
    };
    Ok(Json(state.orders.list(&ctx, filter)?))
}

pub async fn get(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
) -> AppResult<Json<crate::domain::Order>> {
    Ok(Json(state.orders.get(&ctx, id)?))
}

#[derive(Debug, Deserialize)]
pub struct ModifyOrderRequest {
    pub quantity: Option<i64>,
    pub price: Option<rust_decimal::Decimal>,
    pub trigger_price: Option<rust_decimal::Decimal>,
    pub order_type: Option<crate::domain::OrderType>,
}

pub async fn modify(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
    Json(req): Json<ModifyOrderRequest>,
) -> AppResult<Json<crate::domain::Order>> {
    let order = state
        .orders
        .modify(&ctx, id, req.quantity, req.price, req.trigger_price, req.order_type)
        .await?;
    Ok(Json(order))
}

pub async fn cancel(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
) -> AppResult<Json<crate::domain::Order>> {
    Ok(Json(state.orders.cancel(&ctx, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PlaceBatchRequest {
    pub orders: Vec<PlaceOrderRequest>,
    #[serde(default)]
    pub atomic: bool,
}

pub async fn place_batch(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<PlaceBatchRequest>,
) -> AppResult<Json<crate::orders::BatchResult>> {
    Ok(Json(state.orders.place_batch(&ctx, req.orders, req.atomic).await?))
}

pub async fn history(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<crate::audit::AuditEntry>>> {
    // history is per-order, not per-account, but ownership still gates access.
    state.orders.get(&ctx, id)?;
    Ok(Json(state.orders.history(id)?))
}

/// Triggers an out-of-cycle reconciliation pass scoped to the caller's
/// account (spec §4.6 "on demand per order").
pub async fn sync(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> AppResult<Json<crate::reconcile::ReconciliationStats>> {
    let stats = state
        .reconcile
        .poll_account(ctx.trading_account_id)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(stats))
}
