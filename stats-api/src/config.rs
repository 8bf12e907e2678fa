//! Stats API configuration.
//!
//! The API only needs a listen address and the collector's SQLite file.

use std::net::SocketAddr;

use collector::SqliteConfig;

/// Configuration for the stats API HTTP server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP server to.
    pub listen_addr: SocketAddr,
    /// Database written by the collector.
    pub store: SqliteConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        // Bind to all interfaces so a container port mapping is reachable.
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            store: SqliteConfig::default(),
        }
    }
}
