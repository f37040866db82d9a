//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use web_deadend::config::DeadendConfig;
use web_deadend::gelf::{Shipper, ShipperStats};
use web_deadend::http::{AppState, HttpServer};
use web_deadend::observability::RequestStats;
use web_deadend::Shutdown;

/// A decoy server running on an ephemeral local port.
pub struct TestApp {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub stats: Arc<RequestStats>,
    pub shipper: Shipper,
    shipper_stop: Shutdown,
    server: JoinHandle<()>,
    shipper_task: Option<JoinHandle<()>>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn shipper_stats(&self) -> ShipperStats {
        self.shipper.stats()
    }

    /// Trigger shutdown, wait for the server, then let the shipper drain.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.server)
            .await
            .expect("server did not stop")
            .expect("server task panicked");
        self.shipper_stop.trigger();
        if let Some(task) = self.shipper_task {
            tokio::time::timeout(Duration::from_secs(10), task)
                .await
                .expect("shipper did not drain")
                .expect("shipper task panicked");
        }
    }
}

/// Start the full server stack on 127.0.0.1 with an OS-assigned port.
pub async fn spawn_app(config: DeadendConfig) -> TestApp {
    let shutdown = Shutdown::new();
    let shipper_stop = Shutdown::new();
    let (shipper, shipper_task) =
        Shipper::from_config(&config.gelf, shipper_stop.subscribe()).expect("shipper config");
    let stats = Arc::new(RequestStats::default());
    let state = AppState::from_config(&config, shipper.clone(), Arc::clone(&stats)).expect("routes");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config, state);

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        server.run(listener, server_shutdown).await.unwrap();
    });

    TestApp {
        addr,
        shutdown,
        stats,
        shipper,
        shipper_stop,
        server,
        shipper_task,
    }
}

/// UDP GELF collector accepting unchunked, uncompressed datagrams.
pub struct UdpCollector {
    pub addr: SocketAddr,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl UdpCollector {
    pub async fn start() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 65_535];
            while let Ok((n, _)) = socket.recv_from(&mut buf).await {
                if let Ok(doc) = serde_json::from_slice::<Value>(&buf[..n]) {
                    if tx.send(doc).is_err() {
                        break;
                    }
                }
            }
        });

        Self { addr, rx }
    }

    pub fn uri(&self) -> String {
        format!("udp://{}", self.addr)
    }

    pub async fn next(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("no GELF record within 5s")
            .expect("collector closed")
    }
}

/// TCP GELF collector splitting the stream on null bytes.
pub struct TcpCollector {
    pub addr: SocketAddr,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl TcpCollector {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut pending = Vec::new();
                    let mut buf = [0u8; 4096];
                    loop {
                        let n = match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => n,
                        };
                        pending.extend_from_slice(&buf[..n]);
                        while let Some(pos) = pending.iter().position(|b| *b == 0) {
                            let frame: Vec<u8> = pending.drain(..=pos).collect();
                            if let Ok(doc) = serde_json::from_slice::<Value>(&frame[..frame.len() - 1]) {
                                let _ = tx.send(doc);
                            }
                        }
                    }
                });
            }
        });

        Self { addr, rx }
    }

    pub fn uri(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    pub async fn next(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("no GELF record within 5s")
            .expect("collector closed")
    }
}

/// Parse a TOML config snippet on top of defaults.
pub fn config_from(toml_text: &str) -> DeadendConfig {
    web_deadend::config::parse_config(toml_text).expect("test config")
}
