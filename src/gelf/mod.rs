//! Structured log shipping (GELF).
//!
//! # Data Flow
//! ```text
//! RequestContext + Exchange (route id, status, size, duration)
//!     → record.rs (flatten to dotted keys, cap field and record size)
//!     → shipper.rs (try_send onto bounded queue, returns immediately)
//!     → [background worker]
//!     → transport.rs (UDP datagrams/chunks or TCP null-terminated frames)
//!     → Collector
//! ```
//!
//! # Design Decisions
//! - Record construction always runs, even with shipping disabled
//! - Nothing in this module can fail or slow a request: full queues drop,
//!   transport errors are counted
//! - Identity and routing fields are never dropped from a record

pub mod record;
pub mod shipper;
pub mod transport;

pub use record::{Exchange, LogRecord, RecordBuilder, CORE_FIELDS, TRUNCATED_FIELD};
pub use shipper::{Shipper, ShipperError, ShipperStats};
pub use transport::{chunk_message, GelfEndpoint, GelfProtocol, Transport, TransportError};
