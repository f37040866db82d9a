//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Start background tasks (log shipping, statistics, metrics)
//! - Bind the listener and serve until shutdown
//! - Stop background tasks in order after the server stops
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener binds last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::DeadendConfig;
use crate::gelf::{Shipper, ShipperError};
use crate::http::server::{AppState, HttpServer};
use crate::lifecycle::{signals, Shutdown};
use crate::observability::{metrics, RequestStats, StatsReporter};
use crate::routing::RouterError;

/// How long to wait for background tasks after the server stops.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Shipper(#[from] ShipperError),
    #[error("invalid bind address `{0}`")]
    BindAddress(String),
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Run the service until SIGINT/SIGTERM or until `shutdown` is triggered.
pub async fn run(config: DeadendConfig, shutdown: Shutdown) -> Result<(), StartupError> {
    let bind: SocketAddr = config
        .listener
        .bind_address
        .parse()
        .map_err(|_| StartupError::BindAddress(config.listener.bind_address.clone()))?;

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The shipper stops only after the server has finished every request,
    // so exchanges answered during graceful shutdown are still delivered.
    let shipper_stop = Shutdown::new();
    let (shipper, shipper_task) = Shipper::from_config(&config.gelf, shipper_stop.subscribe())?;
    let stats = Arc::new(RequestStats::default());
    let state = AppState::from_config(&config, shipper.clone(), Arc::clone(&stats))?;

    let reporter_task = StatsReporter::new(
        Arc::clone(&stats),
        shipper.clone(),
        Duration::from_secs(config.observability.stats_interval_secs.max(1)),
        Duration::from_secs(config.observability.heartbeat_interval_secs.max(1)),
        config.observability.log_format,
    )
    .spawn(shutdown.subscribe());

    let signal_task = signals::install(shutdown.clone());

    let listener = TcpListener::bind(bind).await.map_err(|source| StartupError::Bind {
        address: bind.to_string(),
        source,
    })?;

    let server = HttpServer::new(config, state);
    let served = server.run(listener, shutdown.clone()).await;

    // Server may have stopped on its own; make sure everything else stops too.
    shutdown.trigger();
    signal_task.abort();
    stop_task(reporter_task).await;

    shipper_stop.trigger();
    if let Some(task) = shipper_task {
        stop_task(task).await;
    }

    let final_stats = shipper.stats();
    tracing::info!(
        requests = stats.total(),
        gelf_sent = final_stats.sent,
        gelf_dropped = final_stats.dropped,
        gelf_failed = final_stats.failed,
        "Shutdown complete"
    );

    served.map_err(StartupError::from)
}

async fn stop_task(task: tokio::task::JoinHandle<()>) {
    if tokio::time::timeout(TASK_STOP_TIMEOUT, task).await.is_err() {
        tracing::warn!("Background task did not stop in time");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpStream, UdpSocket};

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    async fn connect(addr: &str) -> TcpStream {
        for _ in 0..100 {
            if let Ok(stream) = TcpStream::connect(addr).await {
                return stream;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("server did not start on {addr}");
    }

    #[tokio::test]
    async fn invalid_bind_address_fails_fast() {
        let mut config = DeadendConfig::default();
        config.listener.bind_address = "not-an-address".into();
        let result = run(config, Shutdown::new()).await;
        assert!(matches!(result, Err(StartupError::BindAddress(_))));
    }

    #[tokio::test]
    async fn request_in_flight_at_shutdown_is_shipped() {
        let collector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let bind = format!("127.0.0.1:{}", free_port());
        let mut config = DeadendConfig::default();
        config.listener.bind_address = bind.clone();
        config.gelf.server = Some(format!("udp://{}", collector.local_addr().unwrap()));

        let shutdown = Shutdown::new();
        let server = tokio::spawn(run(config, shutdown.clone()));

        let mut stream = connect(&bind).await;
        stream
            .write_all(b"POST /late HTTP/1.1\r\nHost: decoy\r\nContent-Length: 5\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        // The handler is now waiting for the body.
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.trigger();
        tokio::time::sleep(Duration::from_millis(100)).await;
        stream.write_all(b"hello").await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 204"), "{response}");

        tokio::time::timeout(Duration::from_secs(15), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let mut buf = vec![0u8; 65536];
        let n = tokio::time::timeout(Duration::from_secs(5), collector.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(doc["_request.path"], "/late");
        assert_eq!(doc["_request.size"], 5);
    }
}
