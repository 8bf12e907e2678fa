//! Local HTTP fixtures shared by the unit tests.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, Response, StatusCode, body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, Gauge, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

type Routes = Arc<Mutex<HashMap<String, String>>>;

/// Serves fixed bodies by path; unknown paths answer 404.
pub struct FixtureServer {
    addr: SocketAddr,
    routes: Routes,
    task: JoinHandle<()>,
}

impl FixtureServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fixture listener");
        let addr = listener.local_addr().expect("fixture local addr");
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));

        let shared = routes.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = shared.clone();
                tokio::spawn(async move {
                    let svc = service_fn(move |req: Request<Incoming>| {
                        let body = routes
                            .lock()
                            .expect("fixture routes lock")
                            .get(req.uri().path())
                            .cloned();
                        async move { Ok::<_, Infallible>(respond(body)) }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await;
                });
            }
        });

        Self { addr, routes, task }
    }

    /// Starts a server answering `/metrics` with `body`.
    pub async fn with_metrics(body: String) -> Self {
        let server = Self::start().await;
        server.serve("/metrics", body);
        server
    }

    pub fn serve(&self, path: &str, body: impl Into<String>) {
        self.routes
            .lock()
            .expect("fixture routes lock")
            .insert(path.to_string(), body.into());
    }

    pub fn remove(&self, path: &str) {
        self.routes
            .lock()
            .expect("fixture routes lock")
            .remove(path);
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn respond(body: Option<String>) -> Response<Full<Bytes>> {
    let (status, body) = match body {
        Some(body) => (StatusCode::OK, body),
        None => (StatusCode::NOT_FOUND, "not found".to_string()),
    };
    let mut resp = Response::new(Full::new(Bytes::from(body)));
    *resp.status_mut() = status;
    resp
}

/// Accepts connections and never answers, to drive client timeouts.
pub struct HangingServer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl HangingServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind hanging listener");
        let addr = listener.local_addr().expect("hanging local addr");
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        Self { addr, task }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for HangingServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// URL of a local port nothing listens on.
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
    let addr = listener.local_addr().expect("probe local addr");
    drop(listener);
    format!("http://{addr}/metrics")
}

/// Renders the three node gauges the way the node's own registry would.
pub fn exposition(block_size: f64, processing_time: f64, partition_time: f64) -> String {
    let registry = Registry::new();
    for (name, help, value) in [
        ("canopy_block_size", "Size of the last block in bytes", block_size),
        (
            "canopy_block_processing_time",
            "Seconds spent processing the last block",
            processing_time,
        ),
        (
            "canopy_store_partition_time",
            "Seconds spent partitioning storage",
            partition_time,
        ),
    ] {
        let gauge = Gauge::new(name, help).expect("valid gauge opts");
        gauge.set(value);
        registry
            .register(Box::new(gauge))
            .expect("register fixture gauge");
    }

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .expect("encode fixture gauges");
    String::from_utf8(buffer).expect("exposition is utf-8")
}
