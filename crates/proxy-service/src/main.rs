mod routes;
mod sse;
mod state;
mod wire;

use std::path::PathBuf;

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use upstream_proxy_core::config::Config;

use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about = "HTTP proxy translating Claude/OpenAI requests into Upstream calls")]
struct Args {
    /// Path to a TOML config file; merged under CLI flags and over defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    default_model: Option<String>,

    /// Path to the JSON account store; defaults to `~/.config/upstream-proxy/accounts.json`.
    #[arg(long)]
    account_store: Option<String>,

    /// SQLite connection string for usage accounting; omit to keep usage in memory only.
    #[arg(long)]
    usage_database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("upstream_proxy=info,tower_http=info"));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(model) = args.default_model {
        config.default_model = model;
    }
    if let Some(path) = args.account_store {
        config.account_store_path = Some(path);
    }
    if let Some(url) = args.usage_database_url {
        config.usage_database_url = Some(url);
    }

    tracing::info!(host = %config.host, port = config.port, default_model = %config.default_model, "starting upstream-proxy");

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::build(config).await?;

    let app = Router::new()
        .route("/", get(routes::root))
        .route("/v1/models", get(routes::list_models))
        .route("/v1/chat/completions", post(routes::chat_completions))
        .route("/v1/messages", post(routes::messages))
        .route("/v1/messages/count_tokens", post(routes::count_tokens))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
