//! Crate-wide error taxonomy.
//!
//! Internal code propagates with `anyhow::Result` and `.context(...)`;
//! `AppError` is the typed boundary the HTTP layer converts everything into,
//! mirroring the teacher's `AuthError`-with-`IntoResponse` pattern
//! (`auth/middleware.rs`) generalized to the full error taxonomy in spec §7.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{} validation errors", .0.len())]
    ValidationMany(Vec<FieldError>),

    #[error("unauthorized: {0}")]
    Auth(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    #[error("daily order limit exceeded, resets at {reset_at}")]
    DailyLimitExceeded { reset_at: DateTime<Utc> },

    #[error("broker rejected request: {message}")]
    Broker {
        message: String,
        response: serde_json::Value,
    },

    #[error("upstream unavailable")]
    UpstreamUnavailable,

    #[error("upstream timed out")]
    Timeout,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) | AppError::ValidationMany(_) => "VALIDATION_ERROR",
            AppError::Auth(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::DailyLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::Broker { .. } => "BROKER_ERROR",
            AppError::UpstreamUnavailable => "SERVICE_UNAVAILABLE",
            AppError::Timeout => "GATEWAY_TIMEOUT",
            AppError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::ValidationMany(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimitExceeded { .. } | AppError::DailyLimitExceeded { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::Broker { .. } => StatusCode::BAD_GATEWAY,
            AppError::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if let AppError::Internal(ref err) = self {
            tracing::error!(error = ?err, "internal error");
        }

        let mut body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "timestamp": Utc::now().to_rfc3339(),
            }
        });

        match &self {
            AppError::RateLimitExceeded { retry_after } => {
                body["error"]["retry_after_seconds"] = json!(retry_after.as_secs());
            }
            AppError::DailyLimitExceeded { reset_at } => {
                body["error"]["reset_at"] = json!(reset_at.to_rfc3339());
            }
            AppError::ValidationMany(errors) => {
                body["error"]["validation_errors"] = json!(errors);
            }
            AppError::Broker { response, .. } => {
                body["error"]["details"] = response.clone();
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
