//! Error taxonomy for the request-path engine.
//!
//! Translators and the context compressor never surface errors upward — they
//! degrade (cache miss, dropped field, disabled thinking). The [`Executor`]
//! is the only layer that produces a [`ProxyError`], and [`ProxyError`] is
//! the only error type that crosses the HTTP boundary.
//!
//! [`Executor`]: crate::executor::Executor

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::fmt;

/// Kinds of failure the executor can surface to an HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Malformed body or a required field missing.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No account available, or token refresh failed.
    #[error("authentication error: {0}")]
    AuthError(String),

    /// Upstream returned 429, or every account in the pool is unavailable.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<std::time::Duration>,
    },

    /// Upstream reported a business-level quota error.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The upstream dispatch did not complete within the request deadline.
    #[error("upstream timeout")]
    UpstreamTimeout,

    /// Upstream returned a 5xx not otherwise classified.
    #[error("upstream error: {0}")]
    UpstreamError(String),

    /// The account pool is empty — distinct from every account being
    /// temporarily rate-limited, which is `RateLimited` instead.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Anything else — a bug, not a client or upstream fault.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// The HTTP status this error kind maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::InvalidRequest(_) => 400,
            ProxyError::AuthError(_) => 401,
            ProxyError::RateLimited { .. } => 429,
            ProxyError::QuotaExceeded(_) => 429,
            ProxyError::UpstreamTimeout => 504,
            ProxyError::UpstreamError(_) => 502,
            ProxyError::ServiceUnavailable(_) => 503,
            ProxyError::Internal(_) => 500,
        }
    }

    /// Stable string used as the `error.type` field in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest(_) => "invalid_request",
            ProxyError::AuthError(_) => "auth_error",
            ProxyError::RateLimited { .. } => "rate_limited",
            ProxyError::QuotaExceeded(_) => "quota_exceeded",
            ProxyError::UpstreamTimeout => "upstream_timeout",
            ProxyError::UpstreamError(_) => "upstream_error",
            ProxyError::ServiceUnavailable(_) => "service_unavailable",
            ProxyError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ProxyError {
    /// Maps each variant to the status codes in and serializes
    /// a small JSON error body. A `RateLimited` error also carries a
    /// `retry-after` header, the only place this engine adds one.
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let retry_after = match &self {
            ProxyError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        };
        let body = ProxyErrorBody::from(&self);
        let mut response = (
            status,
            axum::Json(json!({"error": {"type": body.kind, "message": body.message}})),
        )
            .into_response();
        if let Some(duration) = retry_after {
            if let Ok(value) = axum::http::HeaderValue::from_str(&duration.as_secs().to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// True when an operation's failure should be treated as an auth error for
/// retry purposes: an HTTP 401, or a message mentioning it.
pub fn looks_like_auth_error(status: Option<u16>, message: impl AsRef<str>) -> bool {
    if status == Some(401) {
        return true;
    }
    let m = message.as_ref();
    m.contains("401") || m.contains("Unauthorized")
}

impl fmt::Debug for ProxyErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxyErrorBody({})", self.message)
    }
}

/// JSON-serializable error body shared by both client dialects.
pub struct ProxyErrorBody {
    pub kind: &'static str,
    pub message: String,
}

impl From<&ProxyError> for ProxyErrorBody {
    fn from(e: &ProxyError) -> Self {
        ProxyErrorBody {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}
