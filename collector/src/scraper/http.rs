//! HTTP gauge scraper.
//!
//! Issues a `GET` against the node's metrics endpoint, parses the body as
//! Prometheus text exposition and keeps the gauges named by
//! [`MetricName`]:
//!
//! ```text
//! # TYPE canopy_block_size gauge
//! canopy_block_size 1024
//! # TYPE canopy_block_processing_time gauge
//! canopy_block_processing_time 0.5
//! # TYPE canopy_store_partition_time gauge
//! canopy_store_partition_time 0.1
//! ```
//!
//! Only samples typed `gauge` are considered. Families with other types,
//! untyped samples and unknown names are skipped. A line that is neither a
//! comment nor a well-formed sample fails the whole scrape.

use std::collections::HashMap;
use std::io;

use prometheus_parse::{Scrape, Value};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use crate::config::ScraperConfig;
use crate::types::MetricName;

/// Longest prefix of a rejected line quoted in the error.
const MAX_REPORTED_LINE: usize = 80;

/// Failure to fetch or decode the exposition payload.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("HTTP GET {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("metrics endpoint {url} returned HTTP status {status}")]
    Status { url: String, status: StatusCode },

    #[error("failed to read response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to parse exposition payload: {0}")]
    Parse(#[source] io::Error),
}

impl ScrapeError {
    /// Returns `true` if the request hit the configured timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            ScrapeError::Transport { source, .. } | ScrapeError::Body { source, .. } => {
                source.is_timeout()
            }
            _ => false,
        }
    }
}

/// Requested gauge is absent from the last successful scrape.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("metric {name} not found")]
pub struct MetricNotFoundError {
    pub name: MetricName,
}

/// Scraper for the node gauges listed in [`MetricName`].
///
/// Holds the values of the last successful scrape. A new scrape replaces
/// the whole map; a failed one leaves it as it was.
pub struct GaugeScraper {
    url: String,
    client: Client,
    gauges: HashMap<MetricName, f64>,
}

impl GaugeScraper {
    /// Builds a scraper for `cfg.url` whose requests are bounded by
    /// `cfg.timeout`.
    pub fn new(cfg: &ScraperConfig) -> Result<Self, ScrapeError> {
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(ScrapeError::Client)?;

        Ok(Self {
            url: cfg.url.clone(),
            client,
            gauges: HashMap::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetches the endpoint and replaces the cached gauges.
    ///
    /// Returns the number of known gauges found in the payload.
    pub async fn scrape(&mut self) -> Result<usize, ScrapeError> {
        let body = self.fetch().await?;
        let gauges = parse_gauges(&body)?;

        debug!(url = %self.url, found = gauges.len(), "scraped node gauges");
        self.gauges = gauges;
        Ok(self.gauges.len())
    }

    /// Returns the cached value of `name` from the last successful scrape.
    pub fn get_metric(&self, name: MetricName) -> Result<f64, MetricNotFoundError> {
        self.gauges
            .get(&name)
            .copied()
            .ok_or(MetricNotFoundError { name })
    }

    async fn fetch(&self) -> Result<String, ScrapeError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|source| ScrapeError::Transport {
                url: self.url.clone(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                url: self.url.clone(),
                status,
            });
        }

        resp.text().await.map_err(|source| ScrapeError::Body {
            url: self.url.clone(),
            source,
        })
    }
}

/// Extracts the known gauges from an exposition payload.
///
/// When a family carries several samples (e.g. one per label set) the last
/// one wins.
fn parse_gauges(body: &str) -> Result<HashMap<MetricName, f64>, ScrapeError> {
    let lines = body.lines().enumerate().map(|(idx, line)| {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || is_sample_line(trimmed) {
            Ok(line.to_owned())
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "line {}: malformed sample {:?}",
                    idx + 1,
                    trimmed.chars().take(MAX_REPORTED_LINE).collect::<String>()
                ),
            ))
        }
    });
    let scrape = Scrape::parse(lines).map_err(ScrapeError::Parse)?;

    let mut gauges = HashMap::with_capacity(MetricName::ALL.len());
    for sample in scrape.samples {
        let Value::Gauge(value) = sample.value else {
            continue;
        };
        if let Some(name) = MetricName::from_family(&sample.metric) {
            gauges.insert(name, value);
        }
    }
    Ok(gauges)
}

/// Checks `name[{labels}] value [timestamp]`.
fn is_sample_line(line: &str) -> bool {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .unwrap_or(line.len());
    let (name, rest) = line.split_at(name_end);
    if !is_metric_name(name) {
        return false;
    }

    let rest = if rest.starts_with('{') {
        match rest.rfind('}') {
            Some(end) => &rest[end + 1..],
            None => return false,
        }
    } else {
        rest
    };

    let mut fields = rest.split_whitespace();
    let Some(value) = fields.next() else {
        return false;
    };
    if value.parse::<f64>().is_err() {
        return false;
    }
    match fields.next() {
        None => true,
        Some(ts) => ts.parse::<i64>().is_ok() && fields.next().is_none(),
    }
}

fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_' || first == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}
