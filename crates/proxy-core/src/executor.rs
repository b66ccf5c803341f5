//! End-to-end per-request orchestration.

use crate::account::Account;
use crate::balancer::LoadBalancer;
use crate::compressor::{CompressionConfig, ContextCompressor};
use crate::error::ProxyError;
use crate::retry::{self, RetryConfig};
use crate::router::ModelRouter;
use crate::signature_cache::SignatureCache;
use crate::translators::{ClientFrame, StreamState, Translator};
use crate::tree::RequestTree;
use crate::upstream::UpstreamClient;
use crate::usage::TokenUsageRecorder;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// One refresh-lock per account so concurrent requests for the same account
/// coalesce on a single token exchange.
#[derive(Default)]
struct RefreshLocks {
    locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RefreshLocks {
    async fn lock_for(&self, account_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// A function that exchanges a refresh token for a new access token.
/// Returns `true` and the new access token on success.
#[async_trait::async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, account: &Account) -> Option<String>;
}

pub struct ExecutorConfig {
    pub max_output_tokens_for_limit: u64,
    pub request_deadline: std::time::Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_output_tokens_for_limit: 1_000_000,
            request_deadline: std::time::Duration::from_secs(120),
        }
    }
}

pub struct Executor {
    router: ModelRouter,
    balancer: Arc<LoadBalancer>,
    compressor: ContextCompressor,
    signature_cache: Arc<SignatureCache>,
    upstream: UpstreamClient,
    usage: Arc<TokenUsageRecorder>,
    refresher: Arc<dyn TokenRefresher>,
    retry_config: RetryConfig,
    config: ExecutorConfig,
    refresh_locks: RefreshLocks,
}

pub struct ExecutedResponse {
    pub frames: Vec<ClientFrame>,
    pub account_email: String,
    pub resolved_model: String,
}

impl Executor {
    pub fn new(
        router: ModelRouter,
        balancer: Arc<LoadBalancer>,
        compression_config: CompressionConfig,
        signature_cache: Arc<SignatureCache>,
        upstream: UpstreamClient,
        usage: Arc<TokenUsageRecorder>,
        refresher: Arc<dyn TokenRefresher>,
        retry_config: RetryConfig,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            router,
            balancer,
            compressor: ContextCompressor::new(compression_config),
            signature_cache,
            upstream,
            usage,
            refresher,
            retry_config,
            config,
            refresh_locks: RefreshLocks::default(),
        }
    }

    /// Run the full pipeline for one client request using `translator` (the
    /// caller has already picked Claude vs OpenAI dialect).
    pub async fn execute(
        &self,
        mut client_tree: RequestTree,
        translator: &dyn Translator,
        stream: bool,
    ) -> Result<ExecutedResponse, ProxyError> {
        if self.balancer.len() == 0 {
            return Err(ProxyError::ServiceUnavailable("no accounts configured".into()));
        }

        let resolved_model = self.router.resolve(&client_tree.model);
        client_tree.model = resolved_model.clone();

        let accounts_tried = self.balancer.len().max(1);
        let mut last_err: Option<ProxyError> = None;

        for _ in 0..accounts_tried {
            let account = self
                .balancer
                .get_next_account()
                .ok_or_else(|| ProxyError::RateLimited {
                    message: "no account available".into(),
                    retry_after: None,
                })?;

            self.compressor
                .apply(&mut client_tree, self.config.max_output_tokens_for_limit);

            match self.try_account(&account, &client_tree, translator, stream).await {
                Ok(frames) => {
                    return Ok(ExecutedResponse {
                        frames,
                        account_email: account.email,
                        resolved_model,
                    });
                }
                Err(ProxyError::RateLimited { message, retry_after }) => {
                    last_err = Some(ProxyError::RateLimited { message, retry_after });
                    continue;
                }
                Err(ProxyError::QuotaExceeded(message)) => {
                    self.balancer.mark_quota_exceeded(&account.id);
                    last_err = Some(ProxyError::QuotaExceeded(message));
                    continue;
                }
                Err(other) => return Err(other),
            }
        }

        Err(last_err.unwrap_or(ProxyError::RateLimited {
            message: "no account available".into(),
            retry_after: None,
        }))
    }

    async fn try_account(
        &self,
        account: &Account,
        tree: &RequestTree,
        translator: &dyn Translator,
        stream: bool,
    ) -> Result<Vec<ClientFrame>, ProxyError> {
        if account.tokens.is_expired() {
            let guard = self.refresh_locks.lock_for(&account.id).await;
            let _held = guard.lock().await;
            self.refresher.refresh(account).await;
        }

        let upstream_body = translator.convert_request(tree, &self.signature_cache);
        let path = if stream {
            "/v1beta/models:streamGenerateContent?alt=sse"
        } else {
            "/v1beta/models:generateContent"
        };

        let account_id = account.id.clone();
        let access_token = account.tokens.access.clone();
        let balancer = self.balancer.clone();

        let (result, _report) = retry::execute(
            &self.retry_config,
            || {
                let upstream = &self.upstream;
                let access_token = access_token.clone();
                let upstream_body = upstream_body.clone();
                async move {
                    if stream {
                        let bytes = upstream
                            .post_stream(path, &access_token, &upstream_body)
                            .await?;
                        Ok(StreamOrUnary::Stream(Box::pin(bytes)))
                    } else {
                        let value = upstream.post_json(path, &access_token, &upstream_body).await?;
                        Ok(StreamOrUnary::Unary(value))
                    }
                }
            },
            || {
                let refresher = self.refresher.clone_ref();
                let account = account.clone();
                async move { refresher.refresh(&account).await.is_some() }
            },
        )
        .await;

        let outcome = result.map_err(|err| {
            if let ProxyError::RateLimited { retry_after, .. } = &err {
                balancer.mark_rate_limited(
                    &account_id,
                    retry_after.map(|d| chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())),
                );
            }
            err
        })?;

        match outcome {
            StreamOrUnary::Unary(value) => {
                let converted = translator.convert_unary(&value, &self.signature_cache);
                let (input, output) = extract_usage_tokens(&value);
                self.usage.record(&account.email, &tree.model, input, output).await;
                Ok(vec![ClientFrame::Unary(converted)])
            }
            StreamOrUnary::Stream(mut bytes) => {
                let mut state = StreamState::new(uuid::Uuid::new_v4().to_string(), chrono_now(), tree.model.clone());
                let mut frames = Vec::new();
                let mut buf = String::new();
                let mut total_input = 0u64;
                let mut total_output = 0u64;

                while let Some(chunk) = bytes.next().await {
                    let chunk = chunk.map_err(|e| ProxyError::UpstreamError(e.to_string()))?;
                    buf.push_str(&String::from_utf8_lossy(&chunk));
                    while let Some(pos) = buf.find("\n\n") {
                        let frame_text = buf[..pos].to_string();
                        buf.drain(..pos + 2);
                        let Some(data) = frame_text.strip_prefix("data: ").or_else(|| frame_text.strip_prefix("data:")) else {
                            continue;
                        };
                        let data = data.trim();
                        if data == "[DONE]" {
                            continue;
                        }
                        let Ok(value) = serde_json::from_str::<Value>(data) else {
                            continue;
                        };
                        if let Some(usage) = value.get("usageMetadata") {
                            let (i, o) = extract_usage_tokens_from_metadata(usage);
                            total_input = i;
                            total_output = o;
                        }
                        frames.extend(translator.convert_stream_chunk(&value, &mut state, &self.signature_cache));
                    }
                }

                self.usage.record(&account.email, &tree.model, total_input, total_output).await;
                Ok(frames)
            }
        }
    }
}

enum StreamOrUnary {
    Unary(Value),
    Stream(std::pin::Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>),
}

fn extract_usage_tokens(value: &Value) -> (u64, u64) {
    extract_usage_tokens_from_metadata(&value["usageMetadata"])
}

fn extract_usage_tokens_from_metadata(usage: &Value) -> (u64, u64) {
    let input = usage.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0);
    let output = usage.get("candidatesTokenCount").and_then(Value::as_u64).unwrap_or(0);
    (input, output)
}

fn chrono_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Let `Arc<dyn TokenRefresher>` be reused inside a `FnOnce` closure without
/// moving the executor's own field.
trait CloneRef {
    fn clone_ref(&self) -> Arc<dyn TokenRefresher>;
}

impl CloneRef for Arc<dyn TokenRefresher> {
    fn clone_ref(&self) -> Arc<dyn TokenRefresher> {
        self.clone()
    }
}
