// stats-api/src/main.rs

//! Stats API binary.
//!
//! Serves the rows recorded by the collector over HTTP:
//!
//! - `GET /health`
//! - `GET /blocks?from=<height>&limit=<n>`
//! - `GET /blocks/latest`
//! - `GET /blocks/{height}`
//! - `GET /summary`

mod config;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{Router, routing::get};
use clap::Parser;
use tokio::signal;

use collector::{MetricStore, SqliteConfig};
use config::ApiConfig;
use routes::{blocks, health};
use state::{AppState, SharedState};

/// Read-only HTTP API over the collector's metrics database.
#[derive(Debug, Parser)]
#[command(name = "stats-api", version, about)]
struct Args {
    /// SQLite database file written by the collector.
    #[arg(long, env = "DB_PATH", default_value = "metrics.sqlite3")]
    db_path: PathBuf,

    /// Address to bind the HTTP server to.
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8081")]
    listen_addr: SocketAddr,
}

impl Args {
    fn into_config(self) -> ApiConfig {
        ApiConfig {
            listen_addr: self.listen_addr,
            store: SqliteConfig {
                path: self.db_path,
                ..ApiConfig::default().store
            },
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "stats_api=info,collector=info".to_string()),
        )
        .init();

    let cfg = Args::parse().into_config();
    if let Err(e) = run(cfg).await {
        tracing::error!("fatal error: {e:#}");
        std::process::exit(1);
    }
}

/// Builds the HTTP router over `state`.
pub(crate) fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/blocks", get(blocks::list_blocks))
        .route("/blocks/latest", get(blocks::latest_block))
        .route("/blocks/{height}", get(blocks::get_block))
        .route("/summary", get(blocks::summary))
        .with_state(state)
}

async fn run(cfg: ApiConfig) -> anyhow::Result<()> {
    let store = MetricStore::open_existing(&cfg.store).await.with_context(|| {
        format!(
            "failed to open metrics database at {}",
            cfg.store.path.display()
        )
    })?;

    let app = router(Arc::new(AppState { store }));

    tracing::info!("stats API listening on http://{}", cfg.listen_addr);

    let listener = tokio::net::TcpListener::bind(cfg.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.listen_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("stats API server error")?;

    Ok(())
}

/// Waits for Ctrl-C and returns, used for graceful shutdown.
async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
