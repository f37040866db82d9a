//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define decoy metrics (requests, latency, log shipping, decode failures)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `deadend_requests_total` (counter): requests by method, status, route
//! - `deadend_request_duration_seconds` (histogram): handling latency
//! - `deadend_gelf_records_total` (counter): shipping outcome per record
//! - `deadend_body_decode_errors_total` (counter): decode failures by kind
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Label values are bounded: unknown methods collapse into `OTHER`,
//!   route labels are configured rule ids

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

pub const REQUESTS_TOTAL: &str = "deadend_requests_total";
pub const REQUEST_DURATION: &str = "deadend_request_duration_seconds";
pub const GELF_RECORDS_TOTAL: &str = "deadend_gelf_records_total";
pub const DECODE_ERRORS_TOTAL: &str = "deadend_body_decode_errors_total";

const LATENCY_SECONDS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0,
];

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION.to_string()), LATENCY_SECONDS)?
        .install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, route: &str, start: Instant) {
    let labels = [
        ("method", method_label(method).to_string()),
        ("status", status.to_string()),
        ("route", route.to_string()),
    ];
    counter!(REQUESTS_TOTAL, &labels).increment(1);
    histogram!(REQUEST_DURATION).record(start.elapsed().as_secs_f64());
}

/// `outcome` is one of `sent`, `dropped`, `failed`, `truncated`.
pub fn record_gelf(outcome: &'static str) {
    counter!(GELF_RECORDS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_decode_error(kind: &'static str) {
    counter!(DECODE_ERRORS_TOTAL, "kind" => kind).increment(1);
}

fn method_label(method: &str) -> &'static str {
    match method {
        "GET" => "GET",
        "POST" => "POST",
        "PUT" => "PUT",
        "DELETE" => "DELETE",
        "PATCH" => "PATCH",
        "HEAD" => "HEAD",
        "OPTIONS" => "OPTIONS",
        "TRACE" => "TRACE",
        "CONNECT" => "CONNECT",
        _ => "OTHER",
    }
}
