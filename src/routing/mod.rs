//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at startup):
//!     RouteConfig[] (declaration order)
//!     → matcher.rs (classify: regex, percent wildcard, placeholder, exact)
//!     → compile response templates
//!     → Freeze as immutable Router (+ fallback rule)
//!
//! Incoming Request (method, path)
//!     → router.rs (ordered scan, method filter)
//!     → matcher.rs (pattern test + captures)
//!     → Return: matched rule and variables, or the fallback
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Deterministic: same input always matches same rule
//! - First match wins (declaration order)

pub mod matcher;
pub mod router;

pub use matcher::{MatchedVars, PatternError, RoutePattern, Segment};
pub use router::{CompiledRoute, RouteMatch, Router, RouterError, FALLBACK_ROUTE_ID};
