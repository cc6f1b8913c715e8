//! `GET /healthz`, `GET /metrics` (spec §6).

use axum::extract::State;

use crate::state::AppState;

pub async fn healthz(State(state): State<AppState>) -> (axum::http::StatusCode, axum::Json<serde_json::Value>) {
    let db_ok = state.db.with_conn(|conn| conn.query_row("SELECT 1", [], |_| Ok(())).map_err(Into::into)).is_ok();
    let status = if db_ok { axum::http::StatusCode::OK } else { axum::http::StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        axum::Json(serde_json::json!({
            "status": if db_ok { "ok" } else { "degraded" },
            "db": db_ok,
        })),
    )
}

pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}
