//! Request context subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request (method, path, headers, query, raw body, client address)
//!     → identity.rs (UUIDv7 request id)            ┐ independent
//!     → decode.rs (body + query → structured data) ┘
//!     → [routing layer captures path variables]
//!     → builder.rs (RequestContext, read-only from here on)
//!     → consumed by render/ and gelf/
//! ```
//!
//! # Design Decisions
//! - Dynamic values are `serde_json::Value`, so rendering and flattening
//!   match on the variant instead of inspecting types at runtime
//! - A context belongs to exactly one request and is never shared

pub mod builder;
pub mod decode;
pub mod identity;

pub use builder::{mask_ip, safe_ip, InboundRequest, RequestContext};
pub use decode::{decode_body, decode_query, BodyKind, DecodeError, DecodeLimits, DecodedBody};
pub use identity::RequestId;
