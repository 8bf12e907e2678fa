//! Persistent per-block metric log.
//!
//! [`sqlite::MetricStore`] keeps one row per observed block in the
//! `metrics` table of a local SQLite file, together with the running chain
//! size and the time elapsed since the previous block was recorded.

pub mod sqlite;

pub use sqlite::{MetricStore, SqliteConfig, StoreInitError, StoreReadError, StoreWriteError};
