//! Prometheus-backed self metrics and HTTP exporter.
//!
//! [`MetricsRegistry`] owns a Prometheus registry and the collector's
//! [`CollectorMetrics`]; [`run_prometheus_http_server`] serves them with
//! `hyper`.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode, body::Incoming, header, server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{info, warn};

use prometheus::{
    self, Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Metrics describing the collector's own work.
#[derive(Clone)]
pub struct CollectorMetrics {
    /// Scrape attempts against the node endpoint.
    pub scrapes: IntCounter,
    /// Scrape attempts that failed (transport, status or parse).
    pub scrape_failures: IntCounter,
    /// Gauges missing from an otherwise successful scrape.
    pub gauge_read_failures: IntCounter,
    /// Latency of a scrape, successful or not, in seconds.
    pub scrape_seconds: Histogram,
    /// Rows written to the store.
    pub rows_inserted: IntCounter,
    /// Rows the store refused or failed to write.
    pub insert_failures: IntCounter,
    /// Height of the last recorded block.
    pub last_height: IntGauge,
    /// Running chain size after the last recorded block, in bytes.
    pub blockchain_size_bytes: Gauge,
}

impl CollectorMetrics {
    /// Registers collector metrics into the given `Registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let scrapes = IntCounter::with_opts(Opts::new(
            "scrapes_total",
            "Scrape attempts against the node metrics endpoint",
        ))?;
        registry.register(Box::new(scrapes.clone()))?;

        let scrape_failures = IntCounter::with_opts(Opts::new(
            "scrape_failures_total",
            "Scrape attempts that failed",
        ))?;
        registry.register(Box::new(scrape_failures.clone()))?;

        let gauge_read_failures = IntCounter::with_opts(Opts::new(
            "gauge_read_failures_total",
            "Known gauges missing from a successful scrape",
        ))?;
        registry.register(Box::new(gauge_read_failures.clone()))?;

        let scrape_seconds = Histogram::with_opts(
            HistogramOpts::new("scrape_seconds", "Time to scrape the node metrics endpoint")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;
        registry.register(Box::new(scrape_seconds.clone()))?;

        let rows_inserted = IntCounter::with_opts(Opts::new(
            "rows_inserted_total",
            "Per-block rows written to the store",
        ))?;
        registry.register(Box::new(rows_inserted.clone()))?;

        let insert_failures = IntCounter::with_opts(Opts::new(
            "insert_failures_total",
            "Per-block rows that could not be written",
        ))?;
        registry.register(Box::new(insert_failures.clone()))?;

        let last_height = IntGauge::with_opts(Opts::new(
            "last_height",
            "Height of the last recorded block",
        ))?;
        registry.register(Box::new(last_height.clone()))?;

        let blockchain_size_bytes = Gauge::with_opts(Opts::new(
            "blockchain_size_bytes",
            "Running chain size after the last recorded block",
        ))?;
        registry.register(Box::new(blockchain_size_bytes.clone()))?;

        Ok(Self {
            scrapes,
            scrape_failures,
            gauge_read_failures,
            scrape_seconds,
            rows_inserted,
            insert_failures,
            last_height,
            blockchain_size_bytes,
        })
    }
}

/// Wrapper around a Prometheus registry and the collector metrics.
///
/// Wrap it in an [`Arc`] to share it between the worker and the exporter.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    pub collector: CollectorMetrics,
}

impl MetricsRegistry {
    /// Creates a registry namespaced `block_metrics` and registers the
    /// collector metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("block_metrics".to_string()), None)?;
        let collector = CollectorMetrics::register(&registry)?;
        Ok(Self {
            registry,
            collector,
        })
    }

    /// Encodes all metrics in this registry into the Prometheus text format.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!("failed to encode Prometheus metrics: {e}");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Runs an HTTP server that exposes the collector metrics.
///
/// Serves `GET /metrics` with the Prometheus text exposition format; all
/// other paths return 404. Intended to be spawned onto the Tokio runtime.
pub async fn run_prometheus_http_server(
    metrics: Arc<MetricsRegistry>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "metrics exporter listening");
    serve(metrics, listener).await
}

async fn serve(
    metrics: Arc<MetricsRegistry>,
    listener: TcpListener,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let metrics = metrics.clone();
                handle_request(req, metrics)
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                warn!("prometheus HTTP server error: {err}");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    metrics: Arc<MetricsRegistry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let mut resp = Response::new(Full::new(Bytes::from(metrics.gather_text())));
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            Ok(resp)
        }
        _ => {
            let mut resp = Response::new(Full::new(Bytes::from_static(b"not found")));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            Ok(resp)
        }
    }
}
