//! Scraping of node gauges from a Prometheus endpoint.
//!
//! The scraper owns the result of the last successful scrape; callers read
//! individual gauges out of it with [`GaugeScraper::get_metric`].

pub mod http;

pub use http::{GaugeScraper, MetricNotFoundError, ScrapeError};
