//! admgr-daemon entry point.
//!
//! This file is intentionally thin: it loads configuration, sets up tracing,
//! builds the dependency record (pool, accounting client, coordinator), runs
//! the boot-time recovery sweep, and only then binds the HTTP server. The
//! sweep is a first-class phase of startup — the router does not exist until
//! every leftover hold has been resolved.

use std::{net::SocketAddr, sync::Arc};

use admgr_accounting::AccountingClient;
use admgr_core::SlotService;
use admgr_daemon::{routes, state};
use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

const DEFAULT_CONFIG_PATH: &str = "/etc/admgr/config.yml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    let config_path =
        std::env::var("ADMGR_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let loaded = admgr_config::load(&[config_path.as_str()])
        .with_context(|| format!("load config from {config_path}"))?;
    let cfg = loaded.config;

    init_tracing(&cfg.logger.level);
    info!(config_hash = %loaded.config_hash, instance_id = %cfg.instance_id, "configuration loaded");

    let pool = admgr_db::connect(&cfg.db.url()).await?;
    admgr_db::migrate(&pool).await?;

    let accounting = AccountingClient::new(
        cfg.accounting.base_url(),
        &cfg.accounting.health_check_path,
        &cfg.instance_id,
    )?;
    accounting.ensure_available().await?;

    // Boot-time reconciliation: no external request is served while any slot
    // is still in hold.
    admgr_core::run_recovery_sweep(&pool, &accounting).await?;

    let service = SlotService::new(pool, accounting);
    let shared = Arc::new(state::AppState::new(service));

    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;
    info!("admgr-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .init();
}

/// CORS: allow only localhost origins (ops dashboards hitting the daemon
/// directly during development).
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}
