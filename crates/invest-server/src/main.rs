//! invest-helper HTTP Server
//!
//! Axum-based server exposing the invest chat tools over a small REST API.
//! A chat transport posts tool calls here and relays the results.

mod handlers;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_core::{MemorySessionStore, SessionStore};
use invest_engine::{
    InvestConfig, InvestService,
    cache::MemoryCache,
    jobs,
    ledger::{LedgerStore, MemoryLedger, PgLedger},
    price::{FixedPriceSource, MoexClient, PriceSource},
    tools::invest_tools,
};

use crate::handlers::{call_tool, health_check, list_tools};
use crate::state::AppState;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = InvestConfig::from_env()?;

    // Market data
    let prices: Arc<dyn PriceSource> =
        match std::env::var("PRICE_SOURCE").unwrap_or_else(|_| "moex".into()).as_str() {
            "fixed" => Arc::new(FixedPriceSource::new()),
            "moex" => Arc::new(MoexClient::new(&config.moex)?),
            other => anyhow::bail!("unknown PRICE_SOURCE '{other}', expected 'moex' or 'fixed'"),
        };
    tracing::info!(source = prices.name(), "price source ready");

    // Ledger
    let ledger: Arc<dyn LedgerStore> = match config.database.url.as_deref() {
        Some(url) => {
            let ledger = PgLedger::connect(url, config.database.max_connections).await?;
            ledger.migrate().await?;
            tracing::info!("using Postgres ledger");
            Arc::new(ledger)
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, portfolios are kept in memory only");
            Arc::new(MemoryLedger::new())
        }
    };

    let cache = Arc::new(MemoryCache::new(config.cache_ttl_chrono()));
    let service = Arc::new(InvestService::new(prices, ledger, cache.clone(), config.clone()));

    let sessions = Arc::new(MemorySessionStore::default());
    let tools = invest_tools(service.clone(), sessions.clone() as Arc<dyn SessionStore>);

    tracing::info!("Registered {} tools:", tools.len());
    for name in tools.names() {
        tracing::info!("  • {}", name);
    }

    // Background jobs
    jobs::spawn_market_refresh(service.context().clone(), config.price_refresh_interval);
    spawn_sweeper(sessions, cache);

    let state = AppState {
        service,
        tools: Arc::new(tools),
    };

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("invest-helper server running on http://{}", addr);
    tracing::info!("  GET  /health            - Health check");
    tracing::info!("  GET  /api/tools         - List tool schemas");
    tracing::info!("  POST /api/tools/{{name}}  - Call a tool");

    axum::serve(listener, router(state)).await?;

    Ok(())
}

pub(crate) fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/tools", get(list_tools))
        .route("/api/tools/{name}", post(call_tool))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Periodically drop idle chat sessions and expired cache entries
fn spawn_sweeper(sessions: Arc<MemorySessionStore>, cache: Arc<MemoryCache>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sessions.purge_expired();
            cache.cleanup_expired();
        }
    });
}
