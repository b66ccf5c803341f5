//! Thin HTTP client for dispatching translated requests to Upstream.
//!
//! Typed modeling of Upstream's wire schema is out of scope, so responses are read
//! back as raw [`serde_json::Value`] / raw SSE lines; classification into
//! [`ProxyError`] variants is the only thing this module does beyond the bare
//! HTTP call.

use crate::error::ProxyError;
use futures::Stream;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Dispatches translated request bodies to Upstream over HTTP, classifying
/// non-2xx responses into [`ProxyError`].
pub struct UpstreamClient {
    http: reqwest::Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client builds");
        Self { http, config }
    }

    /// POST `path` with `body`, returning the full JSON response (non-streamed
    /// call path, e.g. `count_tokens`).
    pub async fn post_json(
        &self,
        path: &str,
        access_token: &str,
        body: &Value,
    ) -> Result<Value, ProxyError> {
        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        classify_response(response).await
    }

    /// POST `path` expecting a streamed (`text/event-stream`) response, and
    /// return the raw byte stream for a translator to chunk into SSE frames.
    pub async fn post_stream(
        &self,
        path: &str,
        access_token: &str,
        body: &Value,
    ) -> Result<impl Stream<Item = Result<bytes::Bytes, reqwest::Error>>, ProxyError> {
        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &text, None));
        }

        Ok(response.bytes_stream())
    }
}

fn map_transport_error(err: reqwest::Error) -> ProxyError {
    if err.is_timeout() {
        ProxyError::UpstreamTimeout
    } else {
        ProxyError::UpstreamError(err.to_string())
    }
}

async fn classify_response(response: reqwest::Response) -> Result<Value, ProxyError> {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);

    if status.is_success() {
        return response
            .json::<Value>()
            .await
            .map_err(|e| ProxyError::UpstreamError(e.to_string()));
    }

    let text = response.text().await.unwrap_or_default();
    Err(classify_status(status.as_u16(), &text, retry_after))
}

/// Maps an Upstream HTTP status (plus the body, for quota-vs-rate-limit
/// disambiguation) to a [`ProxyError`] variant.
pub fn classify_status(status: u16, body: &str, retry_after: Option<Duration>) -> ProxyError {
    match status {
        401 => ProxyError::AuthError(body.to_string()),
        429 => {
            if body.contains("quota") || body.contains("RESOURCE_EXHAUSTED") {
                ProxyError::QuotaExceeded(body.to_string())
            } else {
                ProxyError::RateLimited {
                    message: body.to_string(),
                    retry_after,
                }
            }
        }
        408 | 504 => ProxyError::UpstreamTimeout,
        500..=599 => ProxyError::UpstreamError(format!("{status}: {body}")),
        400 => ProxyError::InvalidRequest(body.to_string()),
        _ => ProxyError::UpstreamError(format!("{status}: {body}")),
    }
}
