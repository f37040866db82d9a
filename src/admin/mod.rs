//! Status endpoint.
//!
//! The only path not answered by the decoy router. `GET` on the configured
//! path reports liveness to allowed networks; any other method on that path
//! falls through to the decoy rules like every other request.

pub mod auth;
pub mod handlers;

use std::net::IpAddr;

use crate::config::StatusConfig;
use crate::render::RenderedResponse;

pub use auth::StatusAccess;
pub use handlers::status_response;

/// Route id reported for status endpoint requests.
pub const STATUS_ROUTE_ID: &str = "status";

#[derive(Debug, Clone)]
pub struct StatusEndpoint {
    path: String,
    access: StatusAccess,
}

impl StatusEndpoint {
    pub fn from_config(config: &StatusConfig) -> Self {
        Self {
            path: config.path.clone(),
            access: StatusAccess::from_networks(&config.allowed),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn handles(&self, method: &str, path: &str) -> bool {
        method == "GET" && path == self.path
    }

    /// Local health checks are neither counted nor shipped.
    pub fn is_local_check(&self, path: &str, client_ip: IpAddr) -> bool {
        path == self.path && client_ip == IpAddr::from([127, 0, 0, 1])
    }

    pub fn respond(&self, client_ip: IpAddr) -> RenderedResponse {
        status_response(&self.access, client_ip)
    }
}
