// AgentProbe - local intercepting proxy for LLM agent API traffic
//
// Architecture:
// - Proxy edge (axum + reqwest): accepts forward-proxy HTTP traffic
// - Flow controller: classifies, persists, and broadcasts each captured flow
// - Store (SQLite): durable log of captured requests and their SSE events
// - Hub: fans out live updates to WebSocket subscribers
// - API (axum): REST + WebSocket surface for the web UI
// - CLI: start / init / trust / env / version subcommands

mod api;
mod cert;
mod cli;
mod classify;
mod config;
mod error;
mod flow;
mod hub;
mod model;
mod proxy_edge;
mod semantic;
mod session;
mod sse;
mod store;

use anyhow::Result;
use cli::Handled;
use config::Config;
use flow::FlowController;
use hub::Hub;
use std::net::SocketAddr;
use std::sync::Arc;
use store::Store;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let start_args = match cli::handle_cli() {
        Handled::Exit(code) => std::process::exit(code),
        Handled::NotHandled(args) => args,
    };

    // Ensure config template exists (helps users discover options)
    Config::ensure_config_exists();

    let mut config = Config::from_env();
    config.proxy_port = start_args.proxy_port;
    config.web_port = start_args.web_port;
    config.headless = config.headless || start_args.headless;
    if let Ok(host) = start_args.host.parse() {
        config.host = host;
    }

    // Precedence: RUST_LOG env var > default "info"
    let default_filter = "agentprobe=info,tower_http=debug,axum=debug";
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();

    tracing::info!(version = %config::VERSION, "AgentProbe starting");
    tracing::info!(proxy = %format!("http://{}:{}", config.host, config.proxy_port), "proxy listening");
    tracing::info!(web = %format!("http://{}:{}", config.host, config.web_port), "web UI listening");

    let store = Arc::new(Store::init(&config.database_path())?);
    let hub = Arc::new(Hub::new());
    let controller = Arc::new(FlowController::new(store.clone(), hub, &config));

    // No default User-Agent is set — the original client's User-Agent is
    // forwarded as-is, since some providers validate it for auth purposes.
    // HTTP/1.1 is forced to avoid HTTP/2 connection-reset issues some
    // providers exhibit when proxied.
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .pool_max_idle_per_host(10)
        .http1_only()
        .build()?;

    let proxy_addr = SocketAddr::new(config.host, config.proxy_port);
    let proxy_router = proxy_edge::router(controller.clone(), client);
    let proxy_handle = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(proxy_addr).await.expect("failed to bind proxy port");
        axum::serve(listener, proxy_router).await.expect("proxy server failed");
    });

    let api_handle = if config.headless {
        None
    } else {
        let web_addr = SocketAddr::new(config.host, config.web_port);
        let api_router = api::router(controller.clone());
        Some(tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(web_addr).await.expect("failed to bind web port");
            axum::serve(listener, api_router).await.expect("web server failed");
        }))
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");

    // Stop accepting new flows first, then let the store close once any
    // in-flight hook has run its course.
    proxy_handle.abort();
    if let Some(handle) = api_handle {
        handle.abort();
    }
    store.close();

    tracing::info!("shutdown complete");
    Ok(())
}
