//! Process-wide request statistics.
//!
//! # Responsibilities
//! - Count requests, traffic, error statuses, paths and client addresses
//! - Periodically log a summary when numbers changed, or a heartbeat
//!
//! # Design Decisions
//! - One shared `RequestStats` behind an `Arc`, created at startup and
//!   handed to the server state; no module-level globals
//! - Atomics for totals, `DashMap` for keyed counters
//! - Path and address tables are bounded so a flood of unique values
//!   cannot grow memory without limit

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::config::LogFormat;
use crate::gelf::{Shipper, ShipperStats};

pub const MAX_TRACKED_PATHS: usize = 10_000;
pub const MAX_TRACKED_IPS: usize = 50_000;
const TOP_PATHS: usize = 10;

#[derive(Debug)]
pub struct RequestStats {
    total: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    errors: DashMap<u16, u64>,
    paths: DashMap<String, u64>,
    /// New paths seen while the path table was full.
    path_misses: AtomicU64,
    path_sweeps: AtomicU64,
    ips: DashMap<String, ()>,
    ips_saturated: AtomicBool,
    max_paths: usize,
    max_ips: usize,
}

/// Serializable view of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub unique_ips: usize,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub top_paths: Vec<(String, u64)>,
    pub errors: BTreeMap<u16, u64>,
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::with_limits(MAX_TRACKED_PATHS, MAX_TRACKED_IPS)
    }
}

impl RequestStats {
    pub fn with_limits(max_paths: usize, max_ips: usize) -> Self {
        Self {
            total: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            errors: DashMap::new(),
            paths: DashMap::new(),
            path_misses: AtomicU64::new(0),
            path_sweeps: AtomicU64::new(0),
            ips: DashMap::new(),
            ips_saturated: AtomicBool::new(false),
            max_paths,
            max_ips,
        }
    }

    /// Count one finished request.
    pub fn record(&self, path: &str, client_ip: &str, status: u16, request_bytes: usize, response_bytes: usize) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(request_bytes as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(response_bytes as u64, Ordering::Relaxed);

        if status >= 400 {
            *self.errors.entry(status).or_insert(0) += 1;
        }

        self.count_path(path);

        if !self.ips.contains_key(client_ip) {
            if self.ips.len() < self.max_ips {
                self.ips.insert(client_ip.to_string(), ());
            } else if !self.ips_saturated.swap(true, Ordering::Relaxed) {
                tracing::warn!(limit = self.max_ips, "Unique client address table full");
            }
        }
    }

    fn count_path(&self, path: &str) {
        if let Some(mut count) = self.paths.get_mut(path) {
            *count += 1;
            return;
        }
        if self.paths.len() >= self.max_paths {
            // A sweep is a full pass, so run at most one per table's worth
            // of turned-away paths.
            let misses = self.path_misses.fetch_add(1, Ordering::Relaxed);
            if misses % self.max_paths.max(1) as u64 != 0 {
                return;
            }
            // Evict one-hit paths, the usual product of scanners.
            self.path_sweeps.fetch_add(1, Ordering::Relaxed);
            self.paths.retain(|_, count| *count > 1);
            if self.paths.len() >= self.max_paths {
                return;
            }
        }
        *self.paths.entry(path.to_string()).or_insert(0) += 1;
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut top_paths: Vec<(String, u64)> = self
            .paths
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        top_paths.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_paths.truncate(TOP_PATHS);

        StatsSnapshot {
            total_requests: self.total(),
            unique_ips: self.ips.len(),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            top_paths,
            errors: self
                .errors
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
        }
    }
}

/// Periodic summary logger.
pub struct StatsReporter {
    stats: Arc<RequestStats>,
    shipper: Shipper,
    interval: Duration,
    heartbeat: Duration,
    format: LogFormat,
}

impl StatsReporter {
    pub fn new(
        stats: Arc<RequestStats>,
        shipper: Shipper,
        interval: Duration,
        heartbeat: Duration,
        format: LogFormat,
    ) -> Self {
        Self {
            stats,
            shipper,
            interval,
            heartbeat,
            format,
        }
    }

    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut last: Option<StatsSnapshot> = None;
        let mut last_total = self.stats.total();
        let mut last_heartbeat = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => {
                    tracing::info!("Stats reporter stopped");
                    return;
                }
            }

            let snapshot = self.stats.snapshot();
            let per_minute = per_minute(snapshot.total_requests - last_total, self.interval);
            last_total = snapshot.total_requests;

            let changed = last.as_ref() != Some(&snapshot);
            let heartbeat_due = last_heartbeat.elapsed() >= self.heartbeat;

            if changed || heartbeat_due {
                self.log(&snapshot, per_minute, heartbeat_due && !changed);
                if heartbeat_due {
                    last_heartbeat = Instant::now();
                }
                last = Some(snapshot);
            }
        }
    }

    fn log(&self, snapshot: &StatsSnapshot, per_minute: u64, heartbeat: bool) {
        let gelf: ShipperStats = self.shipper.stats();
        match self.format {
            LogFormat::Json => {
                let summary = serde_json::json!({
                    "service": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                    "heartbeat": heartbeat,
                    "requests_per_minute": per_minute,
                    "stats": snapshot,
                    "gelf": gelf,
                });
                tracing::info!(summary = %summary, "Request statistics");
            }
            LogFormat::Text => {
                let prefix = if heartbeat { "[HEARTBEAT]" } else { "[STATS]" };
                tracing::info!(
                    "{prefix} Requests/min: {per_minute}, Unique IPs: {}, Total requests: {}, \
                     Traffic: {} in / {} out bytes, Errors: {:?}, GELF dropped: {}",
                    snapshot.unique_ips,
                    snapshot.total_requests,
                    snapshot.bytes_received,
                    snapshot.bytes_sent,
                    snapshot.errors,
                    gelf.dropped,
                );
            }
        }
    }
}

fn per_minute(delta: u64, interval: Duration) -> u64 {
    let secs = interval.as_secs_f64();
    if secs <= 0.0 {
        return delta;
    }
    (delta as f64 * 60.0 / secs).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_requests_and_traffic() {
        let stats = RequestStats::default();
        stats.record("/a", "1.1.1.1", 200, 10, 100);
        stats.record("/a", "1.1.1.1", 404, 5, 0);
        stats.record("/b", "2.2.2.2", 404, 0, 0);
        stats.record("/c", "2.2.2.2", 500, 0, 0);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 4);
        assert_eq!(snapshot.unique_ips, 2);
        assert_eq!(snapshot.bytes_received, 15);
        assert_eq!(snapshot.bytes_sent, 100);
        assert_eq!(snapshot.top_paths[0], ("/a".to_string(), 2));
        assert_eq!(snapshot.errors.get(&404), Some(&2));
        assert_eq!(snapshot.errors.get(&500), Some(&1));
        assert_eq!(snapshot.errors.get(&200), None);
    }

    #[test]
    fn path_table_is_bounded() {
        let stats = RequestStats::with_limits(3, 10);
        stats.record("/keep", "ip", 200, 0, 0);
        stats.record("/keep", "ip", 200, 0, 0);
        for i in 0..10 {
            stats.record(&format!("/scan/{i}"), "ip", 200, 0, 0);
        }
        let snapshot = stats.snapshot();
        assert!(snapshot.top_paths.len() <= 3);
        assert_eq!(snapshot.top_paths[0], ("/keep".to_string(), 2));
        assert_eq!(snapshot.total_requests, 12);
    }

    #[test]
    fn full_path_table_sweeps_rarely() {
        let stats = RequestStats::with_limits(4, 10);
        for hot in ["/a", "/b", "/c", "/d"] {
            stats.record(hot, "ip", 200, 0, 0);
            stats.record(hot, "ip", 200, 0, 0);
        }
        for i in 0..400 {
            stats.record(&format!("/unique/{i}"), "ip", 200, 0, 0);
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.top_paths.len(), 4);
        assert!(snapshot.top_paths.iter().all(|(path, count)| !path.starts_with("/unique") && *count == 2));
        assert_eq!(stats.path_sweeps.load(Ordering::Relaxed), 100);
        assert_eq!(snapshot.total_requests, 408);
    }

    #[test]
    fn address_table_is_bounded() {
        let stats = RequestStats::with_limits(10, 2);
        for i in 0..5 {
            stats.record("/", &format!("10.0.0.{i}"), 200, 0, 0);
        }
        assert_eq!(stats.snapshot().unique_ips, 2);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let stats = Arc::new(RequestStats::default());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        stats.record("/same", &format!("10.{t}.0.{}", i % 10), 503, 1, 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 8000);
        assert_eq!(snapshot.errors.get(&503), Some(&8000));
        assert_eq!(snapshot.top_paths, vec![("/same".to_string(), 8000)]);
        assert_eq!(snapshot.unique_ips, 80);
    }

    #[test]
    fn per_minute_scales_interval() {
        assert_eq!(per_minute(30, Duration::from_secs(30)), 60);
        assert_eq!(per_minute(5, Duration::from_secs(60)), 5);
    }

    #[tokio::test]
    async fn reporter_stops_on_shutdown() {
        let (tx, _) = broadcast::channel(1);
        let reporter = StatsReporter::new(
            Arc::new(RequestStats::default()),
            Shipper::disabled(),
            Duration::from_millis(10),
            Duration::from_secs(3600),
            LogFormat::Text,
        );
        let handle = reporter.spawn(tx.subscribe());
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
