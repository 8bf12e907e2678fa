//! Core domain types used by the collector
//!
//! This module defines the closed set of scraped gauge identifiers, the
//! per-block record assembled by the collector, the persisted row returned
//! by the store, and the root-chain notification payload.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a gauge the collector knows how to read.
///
/// The set is closed: any other family in the exposition payload is ignored
/// by the scraper.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum MetricName {
    /// Size in bytes of the last committed block.
    BlockSize,
    /// Seconds the storage layer spent partitioning data for the block.
    PartitionTime,
    /// Seconds spent processing (building) the block.
    BlockProcessingTime,
}

impl MetricName {
    /// All known identifiers, in the order the collector reads them.
    pub const ALL: [MetricName; 3] = [
        MetricName::BlockProcessingTime,
        MetricName::BlockSize,
        MetricName::PartitionTime,
    ];

    /// Family name as it appears in the exposition payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::BlockSize => "canopy_block_size",
            MetricName::PartitionTime => "canopy_store_partition_time",
            MetricName::BlockProcessingTime => "canopy_block_processing_time",
        }
    }

    /// Maps an exposition family name back to a known identifier.
    pub fn from_family(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-block record assembled by the collector and handed to the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub height: u64,
    /// Block size in bytes.
    pub block_size: u64,
    /// Storage partition time in seconds.
    pub partition_time: f64,
    /// Block build time in seconds.
    pub block_build_time: f64,
}

/// A row of the `metrics` table.
///
/// Besides the [`Metric`] inputs this carries the values derived by the
/// store at insert time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredMetric {
    pub height: u64,
    pub block_build_time: f64,
    pub partition_time: f64,
    pub block_size: u64,
    /// Sum of `block_size` over every row up to and including this one.
    pub blockchain_size: u64,
    /// Insertion time, unix seconds.
    pub timestamp: i64,
    /// Seconds since the row with the next lower height was inserted.
    pub timestamp_delta_seconds: i64,
}

/// Aggregate view over the whole table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub rows: u64,
    pub first_height: Option<u64>,
    pub last_height: Option<u64>,
    pub blockchain_size: u64,
    pub avg_block_build_time: Option<f64>,
    pub avg_partition_time: Option<f64>,
}

/// New-block notification delivered by the root-chain event source.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RootChainInfo {
    pub chain_id: u64,
    pub height: u64,
}
