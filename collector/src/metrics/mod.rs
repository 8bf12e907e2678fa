//! Self-instrumentation for the collector.
//!
//! This module defines Prometheus metrics describing the collector's own
//! health (scrapes, inserts, last recorded height) and a small HTTP
//! exporter that serves them on `/metrics` in Prometheus text format.
//!
//! Typical usage:
//!
//! ```ignore
//! use std::sync::Arc;
//! use collector::metrics::{MetricsRegistry, run_prometheus_http_server};
//!
//! let registry = Arc::new(MetricsRegistry::new()?);
//! tokio::spawn(run_prometheus_http_server(registry.clone(), "127.0.0.1:9899".parse()?));
//!
//! registry.collector.rows_inserted.inc();
//! ```

pub mod prometheus;

pub use self::prometheus::{CollectorMetrics, MetricsRegistry, run_prometheus_http_server};
