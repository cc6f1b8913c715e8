//! Builds the per-request `RequestContext` (spec §6 header contract, §9
//! "per-request context"): parses identity/trace headers, resolves
//! `trading_account_id` + `accessible_account_ids`, and stamps every
//! response with the trace headers it generated or forwarded.
//!
//! Open Question resolved here: the spec's header list (`Authorization`,
//! `Idempotency-Key`, `X-Request-ID`, `X-Trace-ID`, `traceparent`) has no
//! explicit "which account is this request acting on" header. `X-Trading-
//! Account-Id` is added for that purpose (see DESIGN.md).

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::context::{new_span_id, new_trace_id, parse_traceparent, RequestContext};
use crate::state::AppState;

const TRADING_ACCOUNT_HEADER: &str = "x-trading-account-id";

pub async fn context_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let (trace_id, span_id) = req
        .headers()
        .get("traceparent")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_traceparent)
        .or_else(|| {
            req.headers()
                .get("x-trace-id")
                .and_then(|v| v.to_str().ok())
                .map(|t| (t.to_string(), new_span_id()))
        })
        .unwrap_or_else(|| (new_trace_id(), new_span_id()));

    let claims = req.extensions().get::<crate::auth::models::Claims>().cloned();

    let trading_account_id = req
        .headers()
        .get(TRADING_ACCOUNT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok());

    let ctx = match (claims, trading_account_id) {
        (Some(claims), Some(trading_account_id)) => {
            let user_id = Uuid::parse_str(&claims.sub).unwrap_or_else(|_| Uuid::nil());
            let accessible = match crate::clients::PermissionClient::fast_path(
                claims.acct_ids.as_deref().unwrap_or(&[]),
                trading_account_id,
            ) {
                Some(true) => claims.acct_ids.clone().unwrap_or_default(),
                Some(false) => Vec::new(),
                None => match state
                    .permission_client
                    .check(&claims.sub, trading_account_id, &["trade".to_string()])
                    .await
                {
                    Ok(resp) if resp.has_access => vec![trading_account_id],
                    _ => Vec::new(),
                },
            };
            if !accessible.contains(&trading_account_id) {
                return (
                    StatusCode::FORBIDDEN,
                    "caller does not have access to the requested trading account",
                )
                    .into_response();
            }
            RequestContext {
                request_id,
                trace_id,
                span_id,
                user_id,
                trading_account_id,
                accessible_account_ids: accessible,
            }
        }
        (None, _) => return (StatusCode::UNAUTHORIZED, "missing authentication").into_response(),
        (_, None) => return (StatusCode::BAD_REQUEST, "missing X-Trading-Account-Id header").into_response(),
    };

    let traceparent = format!("00-{}-{}-01", ctx.trace_id, ctx.span_id);
    let headers_out = [
        ("x-request-id", ctx.request_id.clone()),
        ("x-trace-id", ctx.trace_id.clone()),
        ("x-span-id", ctx.span_id.clone()),
        ("traceparent", traceparent),
    ];

    req.extensions_mut().insert(ctx);
    let mut response = next.run(req).await;
    for (name, value) in headers_out {
        if let Ok(value) = HeaderValue::from_str(&value) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

/// Guards `/internal/*` routes with a constant-time compare against the
/// configured internal API key (spec §6).
pub async fn internal_api_key_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    use subtle::ConstantTimeEq;

    let provided = req
        .headers()
        .get("x-internal-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let expected = state.config.internal_api_key.as_bytes();
    let matches = provided.len() == expected.len() && bool::from(provided.as_bytes().ct_eq(expected));

    if !matches {
        return (StatusCode::UNAUTHORIZED, "invalid internal API key").into_response();
    }

    next.run(req).await
}

pub fn extract_context(req: &Request) -> Option<&RequestContext> {
    req.extensions().get::<RequestContext>()
}
