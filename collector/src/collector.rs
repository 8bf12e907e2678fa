//! Per-block orchestration: scrape, assemble, persist.
//!
//! A [`Collector`] is owned by a single worker task ([`Collector::run`])
//! that drains the notification channel, so scrape/insert sequences for
//! two blocks never overlap. Every failure along the way is logged and
//! counted; none of them stop the worker.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::metrics::MetricsRegistry;
use crate::scraper::GaugeScraper;
use crate::store::MetricStore;
use crate::types::{Metric, MetricName, RootChainInfo};

/// Glue between the block event source, the scraper and the store.
pub struct Collector {
    scraper: GaugeScraper,
    store: MetricStore,
    metrics: Arc<MetricsRegistry>,
}

impl Collector {
    pub fn new(scraper: GaugeScraper, store: MetricStore, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            scraper,
            store,
            metrics,
        }
    }

    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    /// Handles notifications from `rx` one at a time until every sender is
    /// dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<RootChainInfo>) {
        while let Some(info) = rx.recv().await {
            self.on_new_block(&info).await;
        }
        info!("notification channel closed; collector stopping");
    }

    /// Records the node gauges for the block announced by `info`.
    #[instrument(skip(self, info), fields(chain_id = info.chain_id, height = info.height))]
    pub async fn on_new_block(&mut self, info: &RootChainInfo) {
        let metric = self.gather(info.height).await;
        let stats = &self.metrics.collector;

        match self.store.insert(&metric).await {
            Ok(stored) => {
                stats.rows_inserted.inc();
                stats.last_height.set(i64::try_from(stored.height).unwrap_or(i64::MAX));
                stats.blockchain_size_bytes.set(stored.blockchain_size as f64);
                info!(
                    block_size = stored.block_size,
                    block_build_time = stored.block_build_time,
                    partition_time = stored.partition_time,
                    blockchain_size = stored.blockchain_size,
                    "recorded block metrics"
                );
            }
            Err(e) => {
                stats.insert_failures.inc();
                error!("failed to insert metric: {e}");
            }
        }
    }

    /// Scrapes the node and builds the record for `height`.
    ///
    /// A failed scrape yields all-zero gauges rather than the values cached
    /// from an earlier block.
    async fn gather(&mut self, height: u64) -> Metric {
        let stats = &self.metrics.collector;
        stats.scrapes.inc();

        let timer = stats.scrape_seconds.start_timer();
        let scraped = self.scraper.scrape().await;
        timer.observe_duration();

        if let Err(e) = scraped {
            stats.scrape_failures.inc();
            warn!(
                url = self.scraper.url(),
                timeout = e.is_timeout(),
                "failed to scrape metrics: {e}"
            );
            return Metric {
                height,
                ..Metric::default()
            };
        }

        Metric {
            height,
            block_build_time: self.read_gauge(MetricName::BlockProcessingTime),
            block_size: gauge_to_bytes(self.read_gauge(MetricName::BlockSize)),
            partition_time: self.read_gauge(MetricName::PartitionTime),
        }
    }

    fn read_gauge(&self, name: MetricName) -> f64 {
        match self.scraper.get_metric(name) {
            Ok(value) => value,
            Err(e) => {
                self.metrics.collector.gauge_read_failures.inc();
                warn!("failed to get {name}: {e}");
                0.0
            }
        }
    }
}

/// Converts a byte-count gauge to an integer; negative and non-finite
/// readings count as zero.
fn gauge_to_bytes(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::config::ScraperConfig;
    use crate::store::SqliteConfig;
    use crate::test_utils::{FixtureServer, HangingServer, exposition};
    use crate::types::StoredMetric;

    struct Harness {
        _tmp: TempDir,
        collector: Collector,
        metrics: Arc<MetricsRegistry>,
    }

    async fn harness(metrics_url: String) -> Harness {
        let tmp = TempDir::new().expect("create temp dir");
        let store = MetricStore::open(&SqliteConfig {
            path: tmp.path().join("metrics.sqlite3"),
            ..SqliteConfig::default()
        })
        .await
        .expect("open store");
        let scraper = GaugeScraper::new(&ScraperConfig {
            url: metrics_url,
            timeout: Duration::from_millis(200),
        })
        .expect("build scraper");
        let metrics = Arc::new(MetricsRegistry::new().expect("metrics registry"));

        Harness {
            _tmp: tmp,
            collector: Collector::new(scraper, store, metrics.clone()),
            metrics,
        }
    }

    fn block(height: u64) -> RootChainInfo {
        RootChainInfo {
            chain_id: 1,
            height,
        }
    }

    async fn row(collector: &Collector, height: u64) -> StoredMetric {
        collector
            .store()
            .get(height)
            .await
            .expect("read store")
            .expect("row should exist")
    }

    #[tokio::test]
    async fn consecutive_blocks_accumulate_chain_size() {
        let server = FixtureServer::with_metrics(exposition(1024.0, 0.5, 0.1)).await;
        let mut h = harness(server.url("/metrics")).await;

        h.collector.on_new_block(&block(7)).await;
        let first = row(&h.collector, 7).await;
        assert_eq!(first.block_build_time, 0.5);
        assert_eq!(first.partition_time, 0.1);
        assert_eq!(first.block_size, 1024);
        assert_eq!(first.blockchain_size, 1024);

        server.serve("/metrics", exposition(2048.0, 0.5, 0.1));
        h.collector.on_new_block(&block(8)).await;
        let second = row(&h.collector, 8).await;
        assert_eq!(second.block_size, 2048);
        assert_eq!(second.blockchain_size, 3072);

        let stats = &h.metrics.collector;
        assert_eq!(stats.rows_inserted.get(), 2);
        assert_eq!(stats.last_height.get(), 8);
        assert_eq!(stats.blockchain_size_bytes.get(), 3072.0);
    }

    #[tokio::test]
    async fn scrape_timeout_still_records_zeroed_row() {
        let server = FixtureServer::with_metrics(exposition(1024.0, 0.5, 0.1)).await;
        let mut h = harness(server.url("/metrics")).await;
        h.collector.on_new_block(&block(7)).await;

        let hanging = HangingServer::start().await;
        h.collector.scraper = GaugeScraper::new(&ScraperConfig {
            url: hanging.url("/metrics"),
            timeout: Duration::from_millis(200),
        })
        .expect("build scraper");
        h.collector.on_new_block(&block(8)).await;

        let zeroed = row(&h.collector, 8).await;
        assert_eq!(zeroed.block_build_time, 0.0);
        assert_eq!(zeroed.partition_time, 0.0);
        assert_eq!(zeroed.block_size, 0);
        assert_eq!(zeroed.blockchain_size, 1024);
        assert_eq!(h.metrics.collector.scrape_failures.get(), 1);
    }

    #[tokio::test]
    async fn failed_scrape_does_not_reuse_cached_gauges() {
        let server = FixtureServer::with_metrics(exposition(1024.0, 0.5, 0.1)).await;
        let mut h = harness(server.url("/metrics")).await;
        h.collector.on_new_block(&block(1)).await;

        server.remove("/metrics");
        h.collector.on_new_block(&block(2)).await;

        assert_eq!(
            h.collector.scraper.get_metric(MetricName::BlockSize).unwrap(),
            1024.0
        );

        let second = row(&h.collector, 2).await;
        assert_eq!(second.block_size, 0);
        assert_eq!(second.blockchain_size, 1024);
    }

    #[tokio::test]
    async fn missing_gauge_is_zeroed_and_others_kept() {
        let body = "\
# TYPE canopy_block_size gauge
canopy_block_size 300
# TYPE canopy_store_partition_time gauge
canopy_store_partition_time 0.25
";
        let server = FixtureServer::with_metrics(body.to_string()).await;
        let mut h = harness(server.url("/metrics")).await;

        h.collector.on_new_block(&block(3)).await;

        let stored = row(&h.collector, 3).await;
        assert_eq!(stored.block_size, 300);
        assert_eq!(stored.partition_time, 0.25);
        assert_eq!(stored.block_build_time, 0.0);
        assert_eq!(h.metrics.collector.gauge_read_failures.get(), 1);
    }

    #[tokio::test]
    async fn stale_notification_is_logged_not_stored() {
        let server = FixtureServer::with_metrics(exposition(10.0, 0.5, 0.1)).await;
        let mut h = harness(server.url("/metrics")).await;

        h.collector.on_new_block(&block(5)).await;
        h.collector.on_new_block(&block(4)).await;

        assert!(h.collector.store().get(4).await.expect("read").is_none());
        assert_eq!(h.metrics.collector.insert_failures.get(), 1);
        assert_eq!(h.metrics.collector.rows_inserted.get(), 1);
    }

    #[tokio::test]
    async fn run_processes_queue_in_order_then_stops() {
        let server = FixtureServer::with_metrics(exposition(100.0, 0.5, 0.1)).await;
        let h = harness(server.url("/metrics")).await;
        let store = h.collector.store().clone();

        let (tx, rx) = mpsc::channel(4);
        let worker = tokio::spawn(h.collector.run(rx));
        for height in [1, 2, 3] {
            tx.send(block(height)).await.expect("worker alive");
        }
        drop(tx);
        worker.await.expect("worker exits cleanly");

        let rows = store.list(0, 10).await.expect("list");
        let totals: Vec<(u64, u64)> = rows.iter().map(|r| (r.height, r.blockchain_size)).collect();
        assert_eq!(totals, vec![(1, 100), (2, 200), (3, 300)]);
    }

    #[test]
    fn byte_gauges_are_clamped() {
        assert_eq!(gauge_to_bytes(1024.9), 1024);
        assert_eq!(gauge_to_bytes(-5.0), 0);
        assert_eq!(gauge_to_bytes(f64::NAN), 0);
        assert_eq!(gauge_to_bytes(f64::INFINITY), 0);
    }
}
