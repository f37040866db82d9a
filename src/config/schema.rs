//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the dead end.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the dead end server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeadendConfig {
    /// Listener configuration (bind address, connection limits).
    pub listener: ListenerConfig,

    /// Request size and time limits.
    pub limits: LimitsConfig,

    /// Decoy route definitions, evaluated in declaration order.
    pub routes: Vec<RouteConfig>,

    /// Response served by the catch-all rule.
    pub fallback: ResponseConfig,

    /// Remote GELF collector settings.
    pub gelf: GelfConfig,

    /// Trusted reverse proxies for client address resolution.
    pub proxy: ProxyTrustConfig,

    /// Built-in status endpoint.
    pub status: StatusConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for DeadendConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            limits: LimitsConfig::default(),
            routes: Vec::new(),
            fallback: ResponseConfig {
                status: 204,
                ..ResponseConfig::default()
            },
            gelf: GelfConfig::default(),
            proxy: ProxyTrustConfig::default(),
            status: StatusConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Maximum requests handled at once; excess requests wait (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Request limits.
///
/// A honeypot wants to see long payloads, so these are generous.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body accepted, in bytes.
    pub max_body_bytes: usize,

    /// Maximum length of path plus query string before answering 414.
    pub max_url_length: usize,

    /// Multipart files larger than this are recorded as metadata only.
    pub max_file_capture_bytes: usize,

    /// Total time allowed for a request/response in seconds.
    pub request_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 100 * 1024 * 1024,
            max_url_length: 65_536,
            max_file_capture_bytes: 10 * 1024 * 1024,
            request_timeout_secs: 30,
        }
    }
}

/// One decoy rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Path pattern. A leading `r/` marks a regular expression.
    pub pattern: String,

    /// Route identifier for logging/metrics.
    #[serde(default)]
    pub name: Option<String>,

    /// Methods this rule answers. Absent means every method.
    #[serde(default)]
    pub methods: Option<Vec<String>>,

    /// Decoy response.
    #[serde(flatten)]
    pub response: ResponseConfig,
}

/// A templated decoy response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// HTTP status code.
    pub status: u16,

    /// Content-Type of the rendered body.
    pub media_type: String,

    /// Extra response headers; values are templates.
    pub headers: BTreeMap<String, String>,

    /// Body template.
    pub body: String,

    /// Decode the rendered body from base64 before sending.
    pub base64: bool,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            status: 200,
            media_type: "text/plain".to_string(),
            headers: BTreeMap::new(),
            body: String::new(),
            base64: false,
        }
    }
}

/// GELF collector configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GelfConfig {
    /// Collector URI, `udp://host:port` or `tcp://host:port`. Absent disables shipping.
    pub server: Option<String>,

    /// Records buffered between request handlers and the shipper task.
    pub queue_size: usize,

    /// Upper bound on a single delivery attempt, in milliseconds.
    pub send_timeout_ms: u64,

    /// Maximum serialized record size in bytes.
    pub max_payload_bytes: usize,

    /// Maximum UDP datagram payload before chunking.
    pub chunk_size: usize,

    /// Gzip UDP payloads.
    pub compress: bool,

    /// Cap applied to any single flattened string value.
    pub max_field_bytes: usize,

    /// Value of the GELF `host` field. Defaults to the machine hostname.
    pub source_host: Option<String>,
}

impl Default for GelfConfig {
    fn default() -> Self {
        Self {
            server: None,
            queue_size: 10_000,
            send_timeout_ms: 500,
            max_payload_bytes: 1024 * 1024,
            chunk_size: 8154,
            compress: false,
            max_field_bytes: 32 * 1024,
            source_host: None,
        }
    }
}

/// Reverse proxy trust settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyTrustConfig {
    /// Proxy addresses or CIDR ranges allowed to set X-Forwarded-For.
    pub trusted_proxies: Vec<String>,

    /// Number of proxy hops in front of the server.
    pub depth: usize,

    /// Trust X-Forwarded-For from any peer.
    pub trust_all: bool,
}

impl Default for ProxyTrustConfig {
    fn default() -> Self {
        Self {
            trusted_proxies: Vec::new(),
            depth: 1,
            trust_all: false,
        }
    }
}

/// Status endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Path served by the status handler instead of the decoy router.
    pub path: String,

    /// Networks allowed to see the status payload.
    pub allowed: Vec<String>,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            path: "/deadend-status".to_string(),
            allowed: vec!["0.0.0.0/0".to_string(), "::/0".to_string()],
        }
    }
}

/// Local log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Local log format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Seconds between traffic summaries.
    pub stats_interval_secs: u64,

    /// Seconds between summaries logged even when nothing changed.
    pub heartbeat_interval_secs: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            stats_interval_secs: 60,
            heartbeat_interval_secs: 3600,
        }
    }
}
