//! HTTP route handlers.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use upstream_proxy_core::error::ProxyError;
use upstream_proxy_core::estimator::estimate_request_tokens;

use crate::sse::{render, Dialect};
use crate::state::AppState;
use crate::wire::{claude, openai};

/// `GET /` — a minimal service descriptor.
pub async fn root() -> Response {
    Json(json!({
        "name": "upstream-proxy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

/// `GET /v1/models` — Claude-style when the client announces itself as
/// `claude-cli`, OpenAI-style otherwise.
pub async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let is_claude_cli = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.starts_with("claude-cli"))
        .unwrap_or(false);

    let created = 0i64;
    let model_ids: Vec<&str> = std::iter::once(state.config.default_model.as_str())
        .chain(state.config.model_mappings.values().map(String::as_str))
        .collect();

    if is_claude_cli {
        let data: Vec<Value> = model_ids
            .into_iter()
            .map(|id| json!({"id": id, "display_name": id, "created_at": created}))
            .collect();
        Json(json!({ "data": data })).into_response()
    } else {
        let data: Vec<Value> = model_ids
            .into_iter()
            .map(|id| json!({"id": id, "object": "model", "created": created, "owned_by": "upstream-proxy"}))
            .collect();
        Json(json!({ "object": "list", "data": data })).into_response()
    }
}

/// `POST /v1/chat/completions` — OpenAI dialect.
pub async fn chat_completions(State(state): State<AppState>, body: Json<Value>) -> Result<Response, ProxyError> {
    let body = body.0;
    let stream = openai::wants_stream(&body);
    let tree = openai::parse_request(body)?;
    let response = state.executor.execute(tree, state.openai.as_ref(), stream).await?;
    Ok(render(response.frames, Dialect::OpenAi))
}

/// `POST /v1/messages` — Claude dialect.
pub async fn messages(State(state): State<AppState>, body: Json<Value>) -> Result<Response, ProxyError> {
    let body = body.0;
    let stream = claude::wants_stream(&body);
    let tree = claude::parse_request(body)?;
    let response = state.executor.execute(tree, state.claude.as_ref(), stream).await?;
    Ok(render(response.frames, Dialect::Claude))
}

/// `POST /v1/messages/count_tokens` — no upstream dispatch, just the local
/// heuristic estimate.
pub async fn count_tokens(body: Json<Value>) -> Result<Response, ProxyError> {
    let tree = claude::parse_request(body.0)?;
    let input_tokens = estimate_request_tokens(&tree);
    Ok(Json(json!({ "input_tokens": input_tokens })).into_response())
}
