//! Shared application state wired together in `main`.

use std::sync::Arc;

use upstream_proxy_core::account::{Account, AccountRepository};
use upstream_proxy_core::balancer::LoadBalancer;
use upstream_proxy_core::compressor::CompressionConfig;
use upstream_proxy_core::config::Config;
use upstream_proxy_core::executor::{Executor, ExecutorConfig, TokenRefresher};
use upstream_proxy_core::router::ModelRouter;
use upstream_proxy_core::signature_cache::{SignatureCache, SignatureCacheConfig};
use upstream_proxy_core::translators::claude::ClaudeTranslator;
use upstream_proxy_core::translators::openai::OpenAITranslator;
use upstream_proxy_core::upstream::{UpstreamClient, UpstreamConfig};
use upstream_proxy_core::usage::{InMemoryUsageStore, SqliteUsageStore, TokenUsageRecorder, UsageStore};

/// A [`TokenRefresher`] that has nowhere to exchange a refresh token — the
/// OAuth2 interactive dance is out of scope. It always reports
/// failure, which is what the retry handler and the executor are built to
/// handle gracefully (a terminal 401, not a panic).
pub struct NullRefresher;

#[async_trait::async_trait]
impl TokenRefresher for NullRefresher {
    async fn refresh(&self, _account: &Account) -> Option<String> {
        None
    }
}

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<Executor>,
    pub claude: Arc<ClaudeTranslator>,
    pub openai: Arc<OpenAITranslator>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let account_store_path = config
            .account_store_path
            .clone()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(upstream_proxy_core::account::default_account_store_path);
        let repo = upstream_proxy_core::account::JsonFileAccountRepository::new(account_store_path);
        let accounts = repo.load_all().await?;

        let strategy = match config.load_balancer.strategy {
            upstream_proxy_core::config::LoadBalancerStrategy::RoundRobin => {
                upstream_proxy_core::balancer::Strategy::RoundRobin
            }
            upstream_proxy_core::config::LoadBalancerStrategy::FillFirst => {
                upstream_proxy_core::balancer::Strategy::FillFirst
            }
        };
        let balancer = Arc::new(LoadBalancer::new(
            accounts,
            strategy,
            config.load_balancer.default_rate_limit_secs,
        ));

        let signature_cache = Arc::new(SignatureCache::new(SignatureCacheConfig {
            ttl: std::time::Duration::from_secs(config.signature_cache.ttl_secs),
            max_entries: config.signature_cache.max_entries,
            cleanup_interval: std::time::Duration::from_secs(config.signature_cache.cleanup_interval_secs),
        }));
        if let Some((_handle, _shutdown)) = Arc::clone(&signature_cache).spawn_cleanup_task() {
            tracing::info!("signature cache cleanup task started");
        }

        let usage_store: Arc<dyn UsageStore> = match &config.usage_database_url {
            Some(url) => Arc::new(SqliteUsageStore::new(url).await?),
            None => Arc::new(InMemoryUsageStore::default()),
        };
        let usage = Arc::new(TokenUsageRecorder::new(usage_store));

        let router = ModelRouter::new(config.model_mappings.clone(), config.default_model.clone());
        let compression_config = CompressionConfig {
            layer1_threshold: config.compression.layer1_threshold,
            layer2_threshold: config.compression.layer2_threshold,
            layer3_threshold: config.compression.layer3_threshold,
            keep_last_tool_rounds: config.compression.keep_last_tool_rounds,
            protected_last_n: config.compression.protected_last_n,
        };
        let retry_config = upstream_proxy_core::retry::RetryConfig {
            max_auth_retries: config.retry.max_auth_retries,
            auto_refresh_token: config.retry.auto_refresh_token,
        };

        let executor = Arc::new(Executor::new(
            router,
            balancer,
            compression_config,
            signature_cache,
            UpstreamClient::new(UpstreamConfig::default()),
            usage,
            Arc::new(NullRefresher),
            retry_config,
            ExecutorConfig::default(),
        ));

        Ok(Self {
            executor,
            claude: Arc::new(ClaudeTranslator::new()),
            openai: Arc::new(OpenAITranslator::new()),
            config: Arc::new(config),
        })
    }
}
