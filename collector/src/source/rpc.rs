//! Root-chain height poller.
//!
//! Queries the node RPC for its current height at a fixed interval and
//! emits a [`RootChainInfo`] whenever the height advances:
//!
//! ```json
//! POST /v1/query/height
//! {}
//!
//! Response:
//! { "height": 1234 }
//! ```

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::types::RootChainInfo;

/// RPC route returning the node's current height.
pub const HEIGHT_PATH: &str = "/v1/query/height";

/// Failure to query the node height.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("HTTP POST {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("node RPC {url} returned HTTP status {status}")]
    Status { url: String, status: StatusCode },

    #[error("failed to decode height response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, Deserialize)]
struct HeightResponse {
    height: u64,
}

/// Polls the node RPC and turns height changes into notifications.
pub struct RootChainPoller {
    chain_id: u64,
    endpoint: String,
    client: Client,
    interval: Duration,
    last_height: Option<u64>,
}

impl RootChainPoller {
    pub fn new(cfg: &SourceConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(SourceError::Client)?;

        Ok(Self {
            chain_id: cfg.chain_id,
            endpoint: format!(
                "{}/{}",
                cfg.rpc_url.trim_end_matches('/'),
                HEIGHT_PATH.trim_start_matches('/')
            ),
            client,
            interval: cfg.poll_interval,
            last_height: None,
        })
    }

    /// Asks the node for its current height.
    pub async fn query_height(&self) -> Result<u64, SourceError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|source| SourceError::Transport {
                url: self.endpoint.clone(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: self.endpoint.clone(),
                status,
            });
        }

        let body = resp
            .json::<HeightResponse>()
            .await
            .map_err(|source| SourceError::Decode {
                url: self.endpoint.clone(),
                source,
            })?;
        Ok(body.height)
    }

    /// Queries the height once and returns a notification if it advanced.
    ///
    /// The first successful poll only records the starting height.
    pub async fn poll(&mut self) -> Result<Option<RootChainInfo>, SourceError> {
        let height = self.query_height().await?;

        let Some(last) = self.last_height else {
            info!(height, "root chain height observed");
            self.last_height = Some(height);
            return Ok(None);
        };

        if height <= last {
            if height < last {
                debug!(height, last, "root chain reported a lower height");
            }
            return Ok(None);
        }

        if height > last + 1 {
            warn!(
                skipped = height - last - 1,
                from = last + 1,
                to = height - 1,
                "heights advanced between polls; only the newest is recorded"
            );
        }

        self.last_height = Some(height);
        Ok(Some(RootChainInfo {
            chain_id: self.chain_id,
            height,
        }))
    }

    /// Polls until `shutdown` resolves or the receiving side of `tx` closes.
    pub async fn run(mut self, tx: mpsc::Sender<RootChainInfo>, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("root chain poller stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.poll().await {
                Ok(Some(info)) => {
                    if tx.send(info).await.is_err() {
                        warn!("collector worker has stopped; root chain poller exiting");
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("failed to query root chain height: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FixtureServer, unreachable_url};

    fn poller_for(rpc_url: String) -> RootChainPoller {
        RootChainPoller::new(&SourceConfig {
            chain_id: 3,
            rpc_url,
            poll_interval: Duration::from_millis(20),
            request_timeout: Duration::from_millis(500),
        })
        .expect("build poller")
    }

    #[tokio::test]
    async fn first_poll_records_height_without_notifying() {
        let server = FixtureServer::start().await;
        server.serve(HEIGHT_PATH, r#"{"height": 41}"#);
        let mut poller = poller_for(server.base_url());

        assert_eq!(poller.poll().await.expect("poll"), None);
        assert_eq!(poller.last_height, Some(41));
    }

    #[tokio::test]
    async fn advancing_height_emits_newest_only() {
        let server = FixtureServer::start().await;
        server.serve(HEIGHT_PATH, r#"{"height": 41}"#);
        let mut poller = poller_for(format!("{}/", server.base_url()));
        poller.poll().await.expect("first poll");

        server.serve(HEIGHT_PATH, r#"{"height": 42}"#);
        assert_eq!(
            poller.poll().await.expect("poll"),
            Some(RootChainInfo {
                chain_id: 3,
                height: 42
            })
        );

        assert_eq!(poller.poll().await.expect("unchanged"), None);

        server.serve(HEIGHT_PATH, r#"{"height": 45}"#);
        let info = poller.poll().await.expect("poll").expect("advanced");
        assert_eq!(info.height, 45);

        server.serve(HEIGHT_PATH, r#"{"height": 44}"#);
        assert_eq!(poller.poll().await.expect("lower"), None);
        assert_eq!(poller.last_height, Some(45));
    }

    #[tokio::test]
    async fn bad_payload_is_a_decode_error() {
        let server = FixtureServer::start().await;
        server.serve(HEIGHT_PATH, "not json");
        let poller = poller_for(server.base_url());

        let err = poller.query_height().await.expect_err("decode should fail");
        assert!(matches!(err, SourceError::Decode { .. }));
    }

    #[tokio::test]
    async fn unreachable_node_is_a_transport_error() {
        let poller = poller_for(unreachable_url());
        let err = poller.query_height().await.expect_err("nothing listens");
        assert!(matches!(err, SourceError::Transport { .. }));
    }

    #[tokio::test]
    async fn run_forwards_notifications_and_stops_on_shutdown() {
        let server = FixtureServer::start().await;
        server.serve(HEIGHT_PATH, r#"{"height": 10}"#);
        let poller = poller_for(server.base_url());

        let (tx, mut rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(poller.run(tx, async move {
            let _ = stop_rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        server.serve(HEIGHT_PATH, r#"{"height": 11}"#);

        let info = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("notification within timeout")
            .expect("channel open");
        assert_eq!(info.height, 11);
        assert_eq!(info.chain_id, 3);

        stop_tx.send(()).expect("poller still running");
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("poller stops")
            .expect("poller task");
    }
}
