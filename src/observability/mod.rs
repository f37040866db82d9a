//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, JSON or text)
//!     → metrics.rs (counters, histograms)
//!
//! Request handler:
//!     → stats.rs (shared RequestStats)
//!     → StatsReporter (periodic summary / heartbeat log lines)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through every log line about a request
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
pub mod stats;

pub use logging::init_logging;
pub use stats::{RequestStats, StatsReporter, StatsSnapshot};
