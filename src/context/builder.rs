//! Per-request context assembly.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use serde_json::{json, Map, Value};

use crate::context::decode::{decode_query, DecodeError, DecodedBody};
use crate::context::identity::RequestId;
use crate::routing::MatchedVars;

/// What the listener hands over for one inbound request (body excluded).
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: String,
    pub path: String,
    /// Query string without the leading `?`.
    pub query: String,
    pub headers: HeaderMap,
    pub client_ip: IpAddr,
    pub protocol: String,
    pub host: String,
    pub port: Option<u16>,
}

/// Everything rendering and logging need to know about one request.
///
/// Built once, then only read.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: RequestId,
    pub client_ip: String,
    /// Client address with the last octet (IPv4) or segment (IPv6) redacted.
    pub client_ip_masked: String,
    /// Separator-free form used in file names and URLs (`%IP%`).
    pub client_ip_safe: String,
    pub epoch: i64,
    pub method: String,
    pub path: String,
    pub protocol: String,
    pub host: String,
    pub port: Option<u16>,
    /// Lowercased header names; repeated headers joined with `", "`.
    pub headers: BTreeMap<String, String>,
    pub query: Map<String, Value>,
    pub body: Option<Value>,
    pub raw_body: String,
    pub raw_body_urlencoded: String,
    pub request_size: usize,
    pub matched_vars: MatchedVars,
    pub decode_error: Option<DecodeError>,
}

impl RequestContext {
    /// Build a context with a fresh identifier and arrival time.
    pub fn build(inbound: &InboundRequest, decoded: DecodedBody, matched_vars: MatchedVars) -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        Self::build_with(RequestId::generate(), epoch, inbound, decoded, matched_vars)
    }

    /// Build a context with a caller-supplied identifier and arrival time.
    pub fn build_with(
        id: RequestId,
        epoch: i64,
        inbound: &InboundRequest,
        decoded: DecodedBody,
        matched_vars: MatchedVars,
    ) -> Self {
        let client_ip = inbound.client_ip.to_string();
        Self {
            id,
            client_ip_masked: mask_ip(inbound.client_ip),
            client_ip_safe: safe_ip(&client_ip),
            client_ip,
            epoch,
            method: inbound.method.clone(),
            path: inbound.path.clone(),
            protocol: inbound.protocol.clone(),
            host: inbound.host.clone(),
            port: inbound.port,
            headers: normalize_headers(&inbound.headers),
            query: decode_query(&inbound.query),
            body: decoded.structured,
            raw_body: decoded.raw_text,
            raw_body_urlencoded: decoded.raw_urlencoded,
            request_size: decoded.size,
            matched_vars,
            decode_error: decoded.error,
        }
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// `?`-prefixed URL encoding of query then body parameters, or empty.
    ///
    /// Body keys override query keys of the same name.
    pub fn requestdata(&self) -> String {
        let mut combined = self.query.clone();
        if let Some(Value::Object(body)) = &self.body {
            for (key, value) in body {
                combined.insert(key.clone(), value.clone());
            }
        }
        if combined.is_empty() {
            return String::new();
        }

        let mut pairs = Vec::new();
        for (key, value) in &combined {
            match value {
                Value::Array(items) => {
                    for item in items {
                        pairs.push((key.as_str(), scalar_text(item)));
                    }
                }
                other => pairs.push((key.as_str(), scalar_text(other))),
            }
        }
        match serde_urlencoded::to_string(&pairs) {
            Ok(encoded) => format!("?{encoded}"),
            Err(e) => {
                tracing::debug!(error = %e, "Failed to encode requestdata");
                String::new()
            }
        }
    }

    /// The value tree templates are rendered against.
    pub fn template_scope(&self) -> Value {
        let matched: Map<String, Value> = self
            .matched_vars
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        json!({
            "request": {
                "id": self.id.to_string(),
                "ip": self.client_ip,
                "safe_ip": self.client_ip_safe,
                "masked_ip": self.client_ip_masked,
                "epoch": self.epoch,
                "method": self.method,
                "path": self.path,
                "protocol": self.protocol,
                "host": self.host,
                "port": self.port,
                "headers": self.headers,
                "query_params": self.query,
                "body": self.raw_body,
            },
            "body": self.body.clone().unwrap_or_else(|| Value::Object(Map::new())),
            "query": self.query,
            "matched": matched,
            "path": matched,
            "requestdata": self.requestdata(),
            "raw_body": self.raw_body_urlencoded,
        })
    }
}

/// Filesystem- and URL-safe form of an address: separators become underscores.
pub fn safe_ip(ip: &str) -> String {
    if ip.is_empty() {
        return "unknown".to_string();
    }
    ip.replace(['.', ':'], "_")
}

/// Address with its host-identifying tail replaced by `x`.
pub fn mask_ip(ip: IpAddr) -> String {
    match ip.to_canonical() {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            format!("{a}.{b}.{c}.x")
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            let prefix: Vec<String> = segments[..7].iter().map(|s| format!("{s:x}")).collect();
            format!("{}:x", prefix.join(":"))
        }
    }
}

fn normalize_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut normalized: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        normalized
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    normalized
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
