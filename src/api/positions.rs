//! `/api/v1/positions` handlers (spec §6, SPEC_FULL §11 supplement #1).

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::context::RequestContext;
use crate::domain::Position;
use crate::error::{AppError, AppResult};
use crate::positions::ExecutionPnlSummary;
use crate::state::AppState;

fn load_owned(state: &AppState, ctx: &RequestContext, id: i64) -> AppResult<Position> {
    let position = state
        .positions
        .get(id)
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound(format!("position {id} not found")))?;
    if !ctx.can_access(position.trading_account_id) {
        return Err(AppError::NotFound(format!("position {id} not found")));
    }
    Ok(position)
}

pub async fn list(State(state): State<AppState>, ctx: RequestContext) -> AppResult<Json<Vec<Position>>> {
    Ok(Json(
        state.positions.list_open(ctx.trading_account_id).map_err(AppError::Internal)?,
    ))
}

pub async fn get(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
) -> AppResult<Json<Position>> {
    Ok(Json(load_owned(&state, &ctx, id)?))
}

/// Administrative force-close, regardless of `net_quantity` (operator
/// write-off of a stale or un-reconcilable row).
pub async fn close(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
) -> AppResult<Json<Position>> {
    load_owned(&state, &ctx, id)?;
    state.positions.close_administratively(id).map_err(AppError::Internal)?;
    load_owned(&state, &ctx, id).map(Json)
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub to_execution_id: String,
    pub quantity: i64,
}

/// Reassigns current ownership (`execution_id`) to another execution,
/// leaving `entry_execution_id` untouched so realized P&L attribution
/// for the original opener does not move with it.
pub async fn move_position(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
    Json(req): Json<MoveRequest>,
) -> AppResult<Json<Position>> {
    load_owned(&state, &ctx, id)?;
    state
        .positions
        .transfer_execution(id, &req.to_execution_id, req.quantity)
        .map_err(AppError::Internal)?;
    load_owned(&state, &ctx, id).map(Json)
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub execution_id: String,
    pub trading_day: chrono::NaiveDate,
}

pub async fn summary(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Query(q): Query<SummaryQuery>,
) -> AppResult<Json<ExecutionPnlSummary>> {
    Ok(Json(
        state
            .positions
            .execution_pnl_summary(&q.execution_id, q.trading_day)
            .map_err(AppError::Internal)?,
    ))
}
