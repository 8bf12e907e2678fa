//! Shared application state.

use std::sync::Arc;

use collector::MetricStore;

/// State handed to every request handler through Axum's `State` extractor.
pub struct AppState {
    /// Store opened on the collector's database file.
    pub store: MetricStore,
}

/// Thread-safe alias for `AppState`.
pub type SharedState = Arc<AppState>;
