//! Flattened, size-bounded log records.
//!
//! A record is a flat map from dotted keys to scalar JSON values. Nested
//! objects become `parent.child`, arrays become `parent.0`, `parent.1`.
//! Serialization follows GELF 1.1: the fixed envelope fields plus every
//! record field as an additional `_`-prefixed field.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::config::GelfConfig;
use crate::context::RequestContext;
use crate::gelf::transport::{max_udp_message, GelfEndpoint, GelfProtocol};

pub const GELF_VERSION: &str = "1.1";

/// Syslog "informational".
pub const GELF_LEVEL: u8 = 6;

/// Marker added when fields were dropped to fit the size cap.
pub const TRUNCATED_FIELD: &str = "_truncated";

/// Fields that survive any amount of truncation.
pub const CORE_FIELDS: &[&str] = &[
    "request.id",
    "request.method",
    "request.path",
    "request.remote_addr",
    "route.id",
    "response.status",
    "duration_ms",
];

/// Field groups dropped, in order, when a record is over the size cap.
const DROP_ORDER: &[&str] = &["raw_body", "body", "query", "request.headers", "matched"];

/// Nesting deeper than this is serialized as a JSON string instead.
const MAX_FLATTEN_DEPTH: usize = 16;

/// What happened to the request, as seen from the response side.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub route_id: String,
    pub status: u16,
    pub response_size: usize,
    pub duration: Duration,
}

/// A flattened record ready for shipping.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub host: String,
    pub short_message: String,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    fields: BTreeMap<String, Value>,
}

impl LogRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn is_truncated(&self) -> bool {
        self.fields.contains_key(TRUNCATED_FIELD)
    }

    /// GELF 1.1 JSON document.
    pub fn to_gelf_json(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("version".into(), Value::from(GELF_VERSION));
        doc.insert("host".into(), Value::from(self.host.as_str()));
        doc.insert("short_message".into(), Value::from(self.short_message.as_str()));
        doc.insert("timestamp".into(), Value::from(self.timestamp));
        doc.insert("level".into(), Value::from(GELF_LEVEL));

        for (key, value) in &self.fields {
            let key = if key.starts_with('_') {
                key.clone()
            } else {
                format!("_{key}")
            };
            doc.insert(key, value.clone());
        }
        Value::Object(doc)
    }

    /// Serialized GELF payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Serializing a Value built from valid keys cannot fail.
        serde_json::to_vec(&self.to_gelf_json()).unwrap_or_default()
    }

    fn serialized_len(&self) -> usize {
        self.to_bytes().len()
    }
}

/// Builds records from request contexts.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    host: String,
    max_payload_bytes: usize,
    max_field_bytes: usize,
}

impl RecordBuilder {
    pub fn new(host: impl Into<String>, max_payload_bytes: usize, max_field_bytes: usize) -> Self {
        Self {
            host: host.into(),
            max_payload_bytes,
            max_field_bytes,
        }
    }

    pub fn from_config(config: &GelfConfig) -> Self {
        let host = config
            .source_host
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
        Self::new(host, payload_limit(config), config.max_field_bytes)
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Build the record for one request/response exchange.
    pub fn build(&self, ctx: &RequestContext, exchange: &Exchange) -> LogRecord {
        let duration_ms = exchange.duration.as_millis() as u64;
        let mut fields = BTreeMap::new();

        let mut put = |key: &str, value: Value| {
            insert_scalar(&mut fields, key.to_string(), value, self.max_field_bytes);
        };

        put("request.id", Value::from(ctx.id.to_string()));
        put("request.method", Value::from(ctx.method.as_str()));
        put("request.path", Value::from(ctx.path.as_str()));
        put("request.remote_addr", Value::from(ctx.client_ip.as_str()));
        put("request.host", Value::from(ctx.host.as_str()));
        put("request.protocol", Value::from(ctx.protocol.as_str()));
        put("request.size", Value::from(ctx.request_size));
        put("route.id", Value::from(exchange.route_id.as_str()));
        put("response.status", Value::from(exchange.status));
        put("response.size", Value::from(exchange.response_size));
        put("duration_ms", Value::from(duration_ms));
        put("version", Value::from(env!("CARGO_PKG_VERSION")));
        if let Some(error) = &ctx.decode_error {
            put("decode_error", Value::from(error.to_string()));
        }
        if !ctx.raw_body.is_empty() && ctx.body.is_none() {
            put("raw_body", Value::from(ctx.raw_body.as_str()));
        }

        for (name, value) in &ctx.headers {
            flatten_into(
                &mut fields,
                &format!("request.headers.{}", sanitize_key(name)),
                &Value::from(value.as_str()),
                self.max_field_bytes,
            );
        }
        for (name, value) in &ctx.matched_vars {
            flatten_into(
                &mut fields,
                &format!("matched.{}", sanitize_key(name)),
                &Value::from(value.as_str()),
                self.max_field_bytes,
            );
        }
        flatten_into(&mut fields, "query", &Value::Object(ctx.query.clone()), self.max_field_bytes);
        if let Some(body) = &ctx.body {
            flatten_into(&mut fields, "body", body, self.max_field_bytes);
        }

        let mut record = LogRecord {
            host: self.host.clone(),
            short_message: format!(
                "{} {} {} {}ms",
                ctx.method, ctx.path, exchange.status, duration_ms
            ),
            timestamp: ctx.id.timestamp_millis() as f64 / 1000.0,
            fields,
        };
        self.enforce_size(&mut record);
        record
    }

    /// Drop low-priority field groups until the record fits.
    fn enforce_size(&self, record: &mut LogRecord) {
        if record.serialized_len() <= self.max_payload_bytes {
            return;
        }

        for group in DROP_ORDER {
            let before = record.fields.len();
            record.fields.retain(|key, _| !in_group(key, group));
            if record.fields.len() != before {
                record.fields.insert(TRUNCATED_FIELD.into(), Value::Bool(true));
                tracing::debug!(group = %group, "Dropped log record fields to fit payload cap");
            }
            if record.serialized_len() <= self.max_payload_bytes {
                return;
            }
        }

        // Only core and small metadata fields remain past this point.
        record
            .fields
            .retain(|key, _| CORE_FIELDS.contains(&key.as_str()) || key == TRUNCATED_FIELD);
        record.fields.insert(TRUNCATED_FIELD.into(), Value::Bool(true));
    }
}

/// Record size cap for the configured transport. UDP records must also fit
/// in the chunk budget or the collector never sees them.
fn payload_limit(config: &GelfConfig) -> usize {
    let endpoint = config.server.as_deref().and_then(|uri| GelfEndpoint::parse(uri).ok());
    match endpoint {
        Some(GelfEndpoint {
            protocol: GelfProtocol::Udp,
            ..
        }) => config
            .max_payload_bytes
            .min(max_udp_message(config.chunk_size, config.compress)),
        _ => config.max_payload_bytes,
    }
}

fn in_group(key: &str, group: &str) -> bool {
    key == group || (key.starts_with(group) && key.as_bytes().get(group.len()) == Some(&b'.'))
}

/// Walk `value`, inserting one entry per scalar leaf.
pub fn flatten_into(
    fields: &mut BTreeMap<String, Value>,
    prefix: &str,
    value: &Value,
    max_field_bytes: usize,
) {
    flatten_at(fields, prefix, value, max_field_bytes, 0);
}

fn flatten_at(
    fields: &mut BTreeMap<String, Value>,
    prefix: &str,
    value: &Value,
    max_field_bytes: usize,
    depth: usize,
) {
    if depth >= MAX_FLATTEN_DEPTH && matches!(value, Value::Object(_) | Value::Array(_)) {
        insert_scalar(fields, prefix.to_string(), Value::from(value.to_string()), max_field_bytes);
        return;
    }

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let key = format!("{prefix}.{}", sanitize_key(key));
                flatten_at(fields, &key, child, max_field_bytes, depth + 1);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let key = format!("{prefix}.{index}");
                flatten_at(fields, &key, child, max_field_bytes, depth + 1);
            }
        }
        scalar => insert_scalar(fields, prefix.to_string(), scalar.clone(), max_field_bytes),
    }
}

fn insert_scalar(fields: &mut BTreeMap<String, Value>, key: String, value: Value, max_field_bytes: usize) {
    let value = match value {
        Value::String(s) if s.len() > max_field_bytes => Value::String(cap_string(s, max_field_bytes)),
        other => other,
    };
    fields.insert(key, value);
}

fn cap_string(mut s: String, max_bytes: usize) -> String {
    let original = s.len();
    let mut cut = max_bytes;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
    s.push_str(&format!("...[truncated {} bytes]", original - cut));
    s
}

/// Collector-safe key: word characters, `.` and `-` only.
fn sanitize_key(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}
