//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, catch-all handler, in-flight limit)
//!     → request.rs (client address, InboundRequest, URL/body limits)
//!     → [context, routing, render]
//!     → response.rs (X-Request-ID, RenderedResponse → axum Response)
//!     → Send to client
//!     → [gelf record shipped in the background]
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
