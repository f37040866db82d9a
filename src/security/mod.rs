//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (socket peer + X-Forwarded-For → client address)
//!     → Pass to context building and logging
//! ```
//!
//! # Design Decisions
//! - Accept everything: nothing here rejects traffic
//! - No trust in client input: forwarding headers only count when the
//!   peer is a configured proxy

pub mod headers;

pub use headers::{parse_ip_or_cidr, ClientAddrResolver};
