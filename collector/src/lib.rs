//! Block metrics collector library crate.
//!
//! Records, for every new root-chain block, the node's block size, block
//! processing time and storage partition time, plus the running chain
//! size, into a local SQLite table:
//!
//! - domain types (`types`),
//! - the Prometheus gauge scraper (`scraper`),
//! - the SQLite metric store (`store`),
//! - the per-block orchestrator (`collector`),
//! - root-chain notification sources (`source`),
//! - self-instrumentation and its exporter (`metrics`),
//! - and the process configuration (`config`).

pub mod collector;
pub mod config;
pub mod metrics;
pub mod scraper;
pub mod source;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_utils;

// Re-export top-level configuration types.
pub use config::{CollectorConfig, ExporterConfig, ScraperConfig, SourceConfig};

pub use collector::Collector;
pub use metrics::{CollectorMetrics, MetricsRegistry, run_prometheus_http_server};
pub use scraper::{GaugeScraper, MetricNotFoundError, ScrapeError};
pub use source::{RootChainPoller, SourceError};
pub use store::{MetricStore, SqliteConfig, StoreInitError, StoreReadError, StoreWriteError};

pub use types::*;
