//! Background log shipping.
//!
//! # Responsibilities
//! - Accept exchanges from request handlers without ever blocking them
//! - Build records off the response path, in the background task
//! - Deliver records to the collector from a single background task
//! - Count queued, sent, dropped and failed records
//! - Drain the queue (with a deadline) on shutdown
//!
//! # Design Decisions
//! - Bounded `mpsc` queue with `try_send`: a full queue drops the record
//! - The stop signal is separate from the server's, so exchanges finished
//!   during graceful shutdown are still queued and delivered
//! - Every network operation is bounded by the configured send timeout
//! - Transport failures are counted and logged locally, never returned

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use crate::config::GelfConfig;
use crate::context::RequestContext;
use crate::gelf::record::{Exchange, LogRecord, RecordBuilder};
use crate::gelf::transport::{GelfEndpoint, Transport, TransportError};
use crate::observability::metrics;

/// How long the worker keeps draining after shutdown is signalled.
pub const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Drops and failures after the first are reported once per this many.
const REPORT_EVERY: u64 = 100;

#[derive(Debug, Error)]
pub enum ShipperError {
    #[error("invalid GELF endpoint: {0}")]
    Endpoint(#[from] TransportError),
}

/// Point-in-time view of the shipping counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShipperStats {
    pub queued: u64,
    pub sent: u64,
    pub dropped: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// One unit of work for the shipper task.
#[derive(Debug)]
enum Shipment {
    Record(LogRecord),
    Exchange(Box<(RequestContext, Exchange)>),
}

/// Handle used by request handlers to submit records.
///
/// Cheap to clone; every clone feeds the same queue.
#[derive(Debug, Clone)]
pub struct Shipper {
    tx: Option<mpsc::Sender<Shipment>>,
    counters: Arc<Counters>,
    endpoint: Option<GelfEndpoint>,
}

impl Shipper {
    /// A shipper that accepts records and discards them.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            counters: Arc::new(Counters::default()),
            endpoint: None,
        }
    }

    /// Start the background worker for the configured collector.
    ///
    /// Returns a disabled shipper and no task when no server is configured.
    pub fn from_config(
        config: &GelfConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(Self, Option<JoinHandle<()>>), ShipperError> {
        let Some(server) = config.server.as_deref() else {
            tracing::info!("No GELF server configured, log shipping disabled");
            return Ok((Self::disabled(), None));
        };

        let endpoint = GelfEndpoint::parse(server)?;
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            records: RecordBuilder::from_config(config),
            endpoint: endpoint.clone(),
            config: config.clone(),
            counters: Arc::clone(&counters),
            transport: None,
        };
        let handle = tokio::spawn(worker.run(rx, shutdown));

        tracing::info!(
            endpoint = %endpoint,
            queue_size = config.queue_size,
            "GELF shipping enabled"
        );

        Ok((
            Self {
                tx: Some(tx),
                counters,
                endpoint: Some(endpoint),
            },
            Some(handle),
        ))
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn endpoint(&self) -> Option<&GelfEndpoint> {
        self.endpoint.as_ref()
    }

    /// Queue a finished record for delivery. Never blocks.
    pub fn ship(&self, record: LogRecord) {
        self.enqueue(Shipment::Record(record));
    }

    /// Queue an exchange; its record is built by the shipper task.
    /// Never blocks.
    pub fn ship_exchange(&self, ctx: RequestContext, exchange: Exchange) {
        if self.tx.is_some() {
            self.enqueue(Shipment::Exchange(Box::new((ctx, exchange))));
        }
    }

    fn enqueue(&self, shipment: Shipment) {
        let Some(tx) = &self.tx else {
            return;
        };

        match tx.try_send(shipment) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) | Err(mpsc::error::TrySendError::Closed(_)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::record_gelf("dropped");
                if dropped == 1 {
                    tracing::warn!("GELF queue full, dropping log records");
                } else if dropped % REPORT_EVERY == 0 {
                    tracing::error!(
                        dropped,
                        capacity = tx.max_capacity(),
                        "GELF queue saturated, collector slow or flood in progress"
                    );
                }
            }
        }
    }

    pub fn stats(&self) -> ShipperStats {
        ShipperStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            sent: self.counters.sent.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

struct Worker {
    records: RecordBuilder,
    endpoint: GelfEndpoint,
    config: GelfConfig,
    counters: Arc<Counters>,
    transport: Option<Transport>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Shipment>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(shipment) => self.deliver(shipment).await,
                    None => break,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, draining GELF queue");
                    break;
                }
            }
        }

        rx.close();
        let deadline = Instant::now() + DRAIN_DEADLINE;
        let mut drained = 0u64;
        while let Ok(Some(shipment)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            self.deliver(shipment).await;
            drained += 1;
        }

        let stats = self.snapshot();
        tracing::info!(
            drained,
            sent = stats.sent,
            dropped = stats.dropped,
            failed = stats.failed,
            "GELF shipper stopped"
        );
    }

    async fn deliver(&mut self, shipment: Shipment) {
        let record = match shipment {
            Shipment::Record(record) => record,
            Shipment::Exchange(pending) => {
                let (ctx, exchange) = *pending;
                self.records.build(&ctx, &exchange)
            }
        };
        if record.is_truncated() {
            metrics::record_gelf("truncated");
        }
        let payload = record.to_bytes();
        let limit = Duration::from_millis(self.config.send_timeout_ms);

        let result = match timeout(limit, self.send(&payload)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(limit)),
        };

        match result {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                metrics::record_gelf("sent");
            }
            Err(e) => {
                // Reconnect on the next record.
                self.transport = None;
                let failed = self.counters.failed.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::record_gelf("failed");
                if failed == 1 || failed % REPORT_EVERY == 0 {
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        error = %e,
                        failed,
                        "GELF delivery failed"
                    );
                }
            }
        }
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if self.transport.is_none() {
            self.transport = Some(Transport::connect(&self.endpoint, &self.config).await?);
        }
        match self.transport.as_mut() {
            Some(transport) => transport.send(payload).await,
            None => Ok(()),
        }
    }

    fn snapshot(&self) -> ShipperStats {
        ShipperStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            sent: self.counters.sent.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}
