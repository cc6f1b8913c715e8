//! `/api/v1/gtt` handlers (spec §6), wiring HTTP onto `gtt::GttEngine`.

use axum::{
    extract::{Path, State},
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::context::RequestContext;
use crate::domain::{GttOrder, GttOrderLeg};
use crate::error::AppResult;
use crate::gtt::PlaceGttRequest;
use crate::state::AppState;

pub async fn place(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<PlaceGttRequest>,
) -> AppResult<Json<GttOrder>> {
    Ok(Json(state.gtt.place(&ctx, req).await?))
}

pub async fn list(State(state): State<AppState>, ctx: RequestContext) -> AppResult<Json<Vec<GttOrder>>> {
    Ok(Json(state.gtt.list(&ctx)?))
}

pub async fn get(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
) -> AppResult<Json<GttOrder>> {
    Ok(Json(state.gtt.get(&ctx, id)?))
}

#[derive(Debug, Deserialize)]
pub struct ModifyGttRequest {
    pub trigger_prices: Option<Vec<Decimal>>,
    pub last_price: Option<Decimal>,
    pub orders: Option<Vec<GttOrderLeg>>,
}

pub async fn modify(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
    Json(req): Json<ModifyGttRequest>,
) -> AppResult<Json<GttOrder>> {
    let gtt = state
        .gtt
        .modify(&ctx, id, req.trigger_prices, req.last_price, req.orders)
        .await?;
    Ok(Json(gtt))
}

pub async fn cancel(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
) -> AppResult<Json<GttOrder>> {
    Ok(Json(state.gtt.cancel(&ctx, id).await?))
}

/// No separate broker GTT list-diff exists yet; sync simply re-reads and
/// returns the caller's current GTT set (mirrors `/orders/sync`'s contract
/// of "caller always gets fresh state back").
pub async fn sync(State(state): State<AppState>, ctx: RequestContext) -> AppResult<Json<Vec<GttOrder>>> {
    Ok(Json(state.gtt.list(&ctx)?))
}
