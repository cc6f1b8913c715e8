//! Request-scoped context threaded through every call, replacing thread
//! locals per §9's "per-request context" design note.

use axum::extract::FromRequestParts;
use axum::http::{request::Parts, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: String,
    pub trace_id: String,
    pub span_id: String,
    pub user_id: Uuid,
    pub trading_account_id: i64,
    pub accessible_account_ids: Vec<i64>,
}

impl RequestContext {
    pub fn system(label: &str) -> Self {
        Self {
            request_id: format!("sys-{}", Uuid::new_v4()),
            trace_id: new_trace_id(),
            span_id: new_span_id(),
            user_id: Uuid::nil(),
            trading_account_id: 0,
            accessible_account_ids: vec![],
        }
        .tagged(label)
    }

    fn tagged(self, _label: &str) -> Self {
        self
    }

    pub fn can_access(&self, trading_account_id: i64) -> bool {
        self.accessible_account_ids.contains(&trading_account_id)
    }
}

pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn new_span_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

/// Parses a W3C `traceparent` header (`00-<32hex>-<16hex>-<2hex>`).
pub fn parse_traceparent(value: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = value.split('-').collect();
    if parts.len() != 4 {
        return None;
    }
    let (version, trace_id, parent_id, flags) = (parts[0], parts[1], parts[2], parts[3]);
    if version.len() != 2 || trace_id.len() != 32 || parent_id.len() != 16 || flags.len() != 2 {
        return None;
    }
    if !trace_id.bytes().all(|b| b.is_ascii_hexdigit())
        || !parent_id.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return None;
    }
    Some((trace_id.to_string(), parent_id.to_string()))
}

/// Extracts the `RequestContext` stamped by `api::middleware::context_middleware`.
/// Handlers failing to run that middleware first get a 500, not a panic.
#[async_trait::async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "request context middleware did not run"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_traceparent() {
        let header = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        let (trace_id, span_id) = parse_traceparent(header).unwrap();
        assert_eq!(trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(span_id, "00f067aa0ba902b7");
    }

    #[test]
    fn rejects_malformed_traceparent() {
        assert!(parse_traceparent("not-a-traceparent").is_none());
        assert!(parse_traceparent("00-short-00f067aa0ba902b7-01").is_none());
    }

    #[test]
    fn generated_ids_have_expected_length() {
        assert_eq!(new_trace_id().len(), 32);
        assert_eq!(new_span_id().len(), 16);
    }
}
