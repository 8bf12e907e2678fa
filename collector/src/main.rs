// src/main.rs
//
// Collector process:
//
// - SQLite metric store (fatal if it cannot be opened)
// - gauge scraper against the node's Prometheus endpoint
// - root-chain height poller feeding a single collector worker
// - Prometheus exporter for the collector's own metrics on /metrics

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use collector::{
    Collector, CollectorConfig, ExporterConfig, GaugeScraper, MetricStore, MetricsRegistry,
    RootChainPoller, ScraperConfig, SourceConfig, SqliteConfig, run_prometheus_http_server,
};

/// Notifications buffered between the poller and the collector worker.
const NOTIFICATION_QUEUE: usize = 64;

/// Records per-block node gauges into a local SQLite database.
#[derive(Debug, Parser)]
#[command(name = "collector", version, about)]
struct Args {
    /// Root chain ID the notifications are tagged with.
    #[arg(long = "chain-id", env = "CHAIN_ID", default_value_t = 1)]
    chain_id: u64,

    /// RPC URL of the node.
    #[arg(long, env = "RPC_URL", default_value = "http://localhost:50002")]
    rpc_url: String,

    /// Prometheus metrics URL of the node.
    #[arg(long, env = "METRICS_URL", default_value = "http://localhost:9090/metrics")]
    metrics_url: String,

    /// SQLite database file.
    #[arg(long, env = "DB_PATH", default_value = "metrics.sqlite3")]
    db_path: PathBuf,

    /// Delay between two height queries, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Upper bound on a single metrics scrape, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    scrape_timeout_ms: u64,

    /// Listen address of the collector's own metrics exporter.
    #[arg(long, default_value = "127.0.0.1:9899")]
    exporter_addr: SocketAddr,

    /// Do not run the collector's own metrics exporter.
    #[arg(long)]
    no_exporter: bool,
}

impl Args {
    fn into_config(self) -> CollectorConfig {
        CollectorConfig {
            scraper: ScraperConfig {
                url: self.metrics_url,
                timeout: Duration::from_millis(self.scrape_timeout_ms),
            },
            store: SqliteConfig {
                path: self.db_path,
                ..SqliteConfig::default()
            },
            source: SourceConfig {
                chain_id: self.chain_id,
                rpc_url: self.rpc_url,
                poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
                ..SourceConfig::default()
            },
            exporter: ExporterConfig {
                enabled: !self.no_exporter,
                listen_addr: self.exporter_addr,
            },
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "collector=info".to_string()),
        )
        .init();

    let cfg = Args::parse().into_config();
    if let Err(e) = run(cfg).await {
        error!("fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cfg: CollectorConfig) -> anyhow::Result<()> {
    // ---------------------------
    // Self metrics + exporter
    // ---------------------------

    let metrics = Arc::new(MetricsRegistry::new().context("failed to initialise metrics registry")?);

    if cfg.exporter.enabled {
        let metrics_clone = metrics.clone();
        let addr = cfg.exporter.listen_addr;
        tokio::spawn(async move {
            if let Err(e) = run_prometheus_http_server(metrics_clone, addr).await {
                warn!("metrics HTTP server error: {e}");
            }
        });
    }

    // ---------------------------
    // Store, scraper, poller
    // ---------------------------

    let store = MetricStore::open(&cfg.store).await.with_context(|| {
        format!(
            "failed to create metrics database at {}",
            cfg.store.path.display()
        )
    })?;

    let scraper = GaugeScraper::new(&cfg.scraper).context("failed to create metrics scraper")?;
    let poller = RootChainPoller::new(&cfg.source).context("failed to create root chain poller")?;

    // ---------------------------
    // Collector worker
    // ---------------------------

    let (tx, rx) = mpsc::channel(NOTIFICATION_QUEUE);
    let db = store.clone();
    let worker = tokio::spawn(Collector::new(scraper, store, metrics).run(rx));

    info!(
        chain_id = cfg.source.chain_id,
        rpc_url = %cfg.source.rpc_url,
        metrics_url = %cfg.scraper.url,
        "listening to new blocks"
    );

    // Returns on SIGINT/SIGTERM; dropping `tx` then lets the worker drain.
    poller.run(tx, shutdown_signal()).await;
    worker.await.context("collector worker panicked")?;
    db.close().await;

    info!("closing the program");
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
