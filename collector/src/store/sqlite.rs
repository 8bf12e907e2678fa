//! SQLite-backed metric store.
//!
//! Layout of the single `metrics` table:
//!
//! - `height`: block height, primary key,
//! - `block_build_time`, `partition_time`: seconds, as scraped,
//! - `block_size`: bytes, as scraped,
//! - `blockchain_size`: sum of `block_size` over all rows up to this one,
//! - `timestamp`: insertion time (unix seconds),
//! - `timestamp_delta_seconds`: `timestamp` minus the previous row's.
//!
//! Both derived columns are computed by [`MetricStore::insert`] inside the
//! same transaction as the write, from the rows already on disk.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::FromRow;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::types::{Metric, StoreSummary, StoredMetric};

const CREATE_METRICS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS metrics (
    height INTEGER PRIMARY KEY,
    block_build_time REAL NOT NULL,
    partition_time REAL NOT NULL,
    block_size INTEGER NOT NULL,
    blockchain_size INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    timestamp_delta_seconds INTEGER NOT NULL DEFAULT 0
)
"#;

const SELECT_COLUMNS: &str = "SELECT height, block_build_time, partition_time, block_size, \
     blockchain_size, timestamp, timestamp_delta_seconds FROM metrics";

/// Configuration for [`MetricStore`].
#[derive(Clone, Debug)]
pub struct SqliteConfig {
    /// Filesystem path to the SQLite database file.
    pub path: PathBuf,
    /// Size of the connection pool.
    pub max_connections: u32,
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("metrics.sqlite3"),
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Failure to open the database or create its schema.
#[derive(Debug, Error)]
pub enum StoreInitError {
    #[error("failed to create database directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open database {path:?}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to create metrics schema: {0}")]
    Schema(#[source] sqlx::Error),

    #[error("database {path:?} has no metrics table")]
    MissingTable { path: PathBuf },
}

/// Failure to record a metric.
#[derive(Debug, Error)]
pub enum StoreWriteError {
    #[error("database write failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("height {height} is not above the last stored height {last}")]
    OutOfOrder { height: u64, last: u64 },

    #[error("{field} does not fit in a signed 64-bit column")]
    ValueOutOfRange { field: &'static str },
}

/// Failure to read recorded metrics.
#[derive(Debug, Error)]
pub enum StoreReadError {
    #[error("database read failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("row at height {height} holds a negative {field}")]
    Corrupt { height: i64, field: &'static str },
}

/// Raw row as SQLite returns it; SQLite has no unsigned integers.
#[derive(Debug, FromRow)]
struct MetricRow {
    height: i64,
    block_build_time: f64,
    partition_time: f64,
    block_size: i64,
    blockchain_size: i64,
    timestamp: i64,
    timestamp_delta_seconds: i64,
}

impl TryFrom<MetricRow> for StoredMetric {
    type Error = StoreReadError;

    fn try_from(row: MetricRow) -> Result<Self, Self::Error> {
        let unsigned = |value: i64, field: &'static str| {
            u64::try_from(value).map_err(|_| StoreReadError::Corrupt {
                height: row.height,
                field,
            })
        };

        Ok(StoredMetric {
            height: unsigned(row.height, "height")?,
            block_build_time: row.block_build_time,
            partition_time: row.partition_time,
            block_size: unsigned(row.block_size, "block_size")?,
            blockchain_size: unsigned(row.blockchain_size, "blockchain_size")?,
            timestamp: row.timestamp,
            timestamp_delta_seconds: row.timestamp_delta_seconds,
        })
    }
}

/// Append-only log of per-block metrics.
#[derive(Clone)]
pub struct MetricStore {
    pool: SqlitePool,
}

impl MetricStore {
    /// Opens (or creates) the database at `cfg.path` and initializes the
    /// schema.
    #[instrument(skip(cfg), fields(path = %cfg.path.display()))]
    pub async fn open(cfg: &SqliteConfig) -> Result<Self, StoreInitError> {
        create_parent_dir(&cfg.path).await?;

        let options = SqliteConnectOptions::new()
            .filename(&cfg.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(cfg.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(cfg.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|source| StoreInitError::Connect {
                path: cfg.path.clone(),
                source,
            })?;

        let store = Self { pool };
        store.initialize().await?;

        info!("metric store ready");
        Ok(store)
    }

    /// Opens a database previously created by [`MetricStore::open`] for
    /// reading. Neither the file nor the schema is created.
    #[instrument(skip(cfg), fields(path = %cfg.path.display()))]
    pub async fn open_existing(cfg: &SqliteConfig) -> Result<Self, StoreInitError> {
        let options = SqliteConnectOptions::new()
            .filename(&cfg.path)
            .create_if_missing(false)
            .busy_timeout(cfg.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(cfg.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|source| StoreInitError::Connect {
                path: cfg.path.clone(),
                source,
            })?;

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'metrics'",
        )
        .fetch_one(&pool)
        .await
        .map_err(|source| StoreInitError::Connect {
            path: cfg.path.clone(),
            source,
        })?;
        if tables == 0 {
            return Err(StoreInitError::MissingTable {
                path: cfg.path.clone(),
            });
        }

        info!("metric store opened");
        Ok(Self { pool })
    }

    /// Waits for in-flight queries and closes every pooled connection.
    /// Later calls on any clone of this store fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Round-trips a trivial query to check the database is reachable.
    pub async fn ping(&self) -> Result<(), StoreReadError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Creates the `metrics` table if it does not exist yet.
    pub async fn initialize(&self) -> Result<(), StoreInitError> {
        sqlx::query(CREATE_METRICS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(StoreInitError::Schema)?;
        Ok(())
    }

    /// Records `metric`, stamping it with the current wall-clock time.
    pub async fn insert(&self, metric: &Metric) -> Result<StoredMetric, StoreWriteError> {
        self.insert_at(metric, current_unix_timestamp()).await
    }

    #[instrument(skip(self, metric), fields(height = metric.height))]
    async fn insert_at(
        &self,
        metric: &Metric,
        timestamp: i64,
    ) -> Result<StoredMetric, StoreWriteError> {
        let height = to_column("height", metric.height)?;
        let block_size = to_column("block_size", metric.block_size)?;

        let mut tx = self.pool.begin().await?;

        let previous: Option<(i64, i64)> =
            sqlx::query_as("SELECT height, timestamp FROM metrics ORDER BY height DESC LIMIT 1")
                .fetch_optional(&mut *tx)
                .await?;

        if let Some((last, _)) = previous {
            if height <= last {
                return Err(StoreWriteError::OutOfOrder {
                    height: metric.height,
                    last: last as u64,
                });
            }
        }

        let current_size: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(block_size), 0) FROM metrics")
                .fetch_one(&mut *tx)
                .await?;
        let blockchain_size =
            current_size
                .checked_add(block_size)
                .ok_or(StoreWriteError::ValueOutOfRange {
                    field: "blockchain_size",
                })?;

        let timestamp_delta_seconds = previous
            .map(|(_, prev_ts)| (timestamp - prev_ts).max(0))
            .unwrap_or(0);

        sqlx::query(
            r#"
            INSERT INTO metrics (height, block_build_time, partition_time, block_size,
                                 blockchain_size, timestamp, timestamp_delta_seconds)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(height)
        .bind(metric.block_build_time)
        .bind(metric.partition_time)
        .bind(block_size)
        .bind(blockchain_size)
        .bind(timestamp)
        .bind(timestamp_delta_seconds)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(blockchain_size, timestamp_delta_seconds, "metric recorded");

        Ok(StoredMetric {
            height: metric.height,
            block_build_time: metric.block_build_time,
            partition_time: metric.partition_time,
            block_size: metric.block_size,
            blockchain_size: blockchain_size as u64,
            timestamp,
            timestamp_delta_seconds,
        })
    }

    /// Fetches the row recorded for `height`, if any.
    pub async fn get(&self, height: u64) -> Result<Option<StoredMetric>, StoreReadError> {
        let Ok(height) = i64::try_from(height) else {
            return Ok(None);
        };

        let row: Option<MetricRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE height = ?"))
                .bind(height)
                .fetch_optional(&self.pool)
                .await?;

        row.map(StoredMetric::try_from).transpose()
    }

    /// Returns the row with the greatest height, if any.
    pub async fn latest(&self) -> Result<Option<StoredMetric>, StoreReadError> {
        let row: Option<MetricRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY height DESC LIMIT 1"))
                .fetch_optional(&self.pool)
                .await?;

        row.map(StoredMetric::try_from).transpose()
    }

    /// Returns up to `limit` rows starting at `from_height`, ascending.
    pub async fn list(
        &self,
        from_height: u64,
        limit: u32,
    ) -> Result<Vec<StoredMetric>, StoreReadError> {
        let Ok(from_height) = i64::try_from(from_height) else {
            return Ok(Vec::new());
        };

        let rows: Vec<MetricRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE height >= ? ORDER BY height ASC LIMIT ?"
        ))
        .bind(from_height)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredMetric::try_from).collect()
    }

    /// Aggregates over the whole table.
    pub async fn summary(&self) -> Result<StoreSummary, StoreReadError> {
        let (rows, first, last, size, avg_build, avg_partition): (
            i64,
            Option<i64>,
            Option<i64>,
            i64,
            Option<f64>,
            Option<f64>,
        ) = sqlx::query_as(
            r#"
            SELECT COUNT(*), MIN(height), MAX(height), COALESCE(SUM(block_size), 0),
                   AVG(block_build_time), AVG(partition_time)
            FROM metrics
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreSummary {
            rows: rows.max(0) as u64,
            first_height: first.map(|h| h as u64),
            last_height: last.map(|h| h as u64),
            blockchain_size: size.max(0) as u64,
            avg_block_build_time: avg_build,
            avg_partition_time: avg_partition,
        })
    }
}

async fn create_parent_dir(path: &Path) -> Result<(), StoreInitError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|source| StoreInitError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })
}

fn to_column(field: &'static str, value: u64) -> Result<i64, StoreWriteError> {
    i64::try_from(value).map_err(|_| StoreWriteError::ValueOutOfRange { field })
}

/// Returns the current wall-clock time as seconds since Unix epoch.
///
/// On error (system clock before epoch) this falls back to 0.
fn current_unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs() as i64
}
