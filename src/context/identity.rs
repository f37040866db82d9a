//! Time-ordered request identifiers.
//!
//! # Responsibilities
//! - Generate one UUIDv7 per request
//! - Keep the millisecond prefix non-decreasing within the process
//! - Expose canonical text and raw bytes
//!
//! # Design Decisions
//! - The timestamp is clamped to the highest value handed out so far, so a
//!   wall clock stepping backwards never reorders identifiers
//! - The 74 bits after the timestamp come from the thread-local CSPRNG;
//!   uniqueness under concurrency rests on them, not on clock resolution

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use uuid::{Builder, Uuid};

/// Highest millisecond timestamp issued so far.
static LAST_MILLIS: AtomicU64 = AtomicU64::new(0);

/// Unique, time-sortable identifier for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a new identifier stamped with the current time.
    pub fn generate() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let previous = LAST_MILLIS.fetch_max(now, Ordering::AcqRel);
        let millis = previous.max(now);

        let mut random = [0u8; 10];
        rand::thread_rng().fill_bytes(&mut random);

        Self(Builder::from_unix_timestamp_millis(millis, &random).into_uuid())
    }

    /// Milliseconds since the Unix epoch encoded in the leading 48 bits.
    pub fn timestamp_millis(&self) -> u64 {
        let bytes = self.0.as_bytes();
        bytes[..6]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }

    /// Raw 16-byte form.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}
