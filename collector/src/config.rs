//! Top-level configuration for the collector.
//!
//! This module aggregates configuration for:
//!
//! - the gauge scraper (metrics URL + timeout),
//! - the metric store (SQLite path, see [`SqliteConfig`]),
//! - the root-chain height poller (RPC URL + poll interval),
//! - the self-telemetry exporter (enable flag + listen address).
//!
//! `main.rs` fills a [`CollectorConfig`] from command-line flags; tests
//! construct the pieces directly from defaults.

use std::net::SocketAddr;
use std::time::Duration;

use crate::store::SqliteConfig;

/// Configuration for the gauge scraper.
#[derive(Clone, Debug)]
pub struct ScraperConfig {
    /// Full URL of the node's Prometheus endpoint.
    pub url: String,
    /// Upper bound on a single scrape request.
    pub timeout: Duration,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9090/metrics".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for the root-chain height poller.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Chain the notifications are tagged with.
    pub chain_id: u64,
    /// Base URL of the node RPC, e.g. `"http://localhost:50002"`.
    pub rpc_url: String,
    /// Delay between two height queries.
    pub poll_interval: Duration,
    /// Request timeout for a single height query.
    pub request_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            rpc_url: "http://localhost:50002".to_string(),
            poll_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for the Prometheus exporter of the collector's own metrics.
#[derive(Clone, Debug)]
pub struct ExporterConfig {
    /// Whether to run a `/metrics` HTTP exporter.
    pub enabled: bool,
    /// Address to bind the metrics HTTP server to.
    pub listen_addr: SocketAddr,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9899)),
        }
    }
}

/// Top-level configuration for a collector process.
#[derive(Clone, Debug, Default)]
pub struct CollectorConfig {
    pub scraper: ScraperConfig,
    pub store: SqliteConfig,
    pub source: SourceConfig,
    pub exporter: ExporterConfig,
}
