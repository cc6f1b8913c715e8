//! HTTP surface (spec §6), mounted under `/api/v1` plus the bare
//! `/healthz`/`/metrics` pair.

pub mod gtt;
pub mod health;
pub mod internal;
pub mod middleware;
pub mod orders;
pub mod positions;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::auth_middleware;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let orders_routes = Router::new()
        .route("/", post(orders::place).get(orders::list))
        .route("/batch", post(orders::place_batch))
        .route("/sync", post(orders::sync))
        .route("/:id", get(orders::get).patch(orders::modify).delete(orders::cancel))
        .route("/:id/history", get(orders::history));

    let positions_routes = Router::new()
        .route("/", get(positions::list))
        .route("/summary", get(positions::summary))
        .route("/:id", get(positions::get))
        .route("/:id/close", post(positions::close))
        .route("/:id/move", post(positions::move_position));

    let gtt_routes = Router::new()
        .route("/", post(gtt::place).get(gtt::list))
        .route("/sync", post(gtt::sync))
        .route("/:id", get(gtt::get).patch(gtt::modify).delete(gtt::cancel));

    let v1 = Router::new()
        .nest("/orders", orders_routes)
        .nest("/positions", positions_routes)
        .nest("/gtt", gtt_routes)
        .layer(from_fn_with_state(state.clone(), middleware::context_middleware))
        .layer(from_fn_with_state(state.jwt.clone(), auth_middleware));

    let internal_routes = Router::new()
        .route("/reload-accounts", post(internal::reload_accounts))
        .route("/reconcile/:order_id", post(internal::reconcile_order))
        .route("/pnl/calculate", post(internal::pnl_calculate))
        .route("/rate-limits/stats", get(internal::rate_limit_stats))
        .route("/tiers/summary", get(internal::tiers_summary))
        .layer(from_fn_with_state(state.clone(), middleware::internal_api_key_middleware));

    Router::new()
        .nest("/api/v1", v1)
        .nest("/internal", internal_routes)
        .route("/healthz", get(health::healthz))
        .route("/metrics", get(health::metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
