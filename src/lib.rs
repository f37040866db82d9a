//! HTTP dead end: a catch-all decoy server that answers every request with
//! a configured response and ships a structured record of it.

pub mod admin;
pub mod config;
pub mod context;
pub mod gelf;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod render;
pub mod routing;
pub mod security;

pub use config::schema::DeadendConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
