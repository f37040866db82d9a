//! Request body and query string decoding.
//!
//! # Responsibilities
//! - Decode query strings into key/value maps (repeated keys become arrays)
//! - Decode JSON, form-urlencoded, multipart and XML bodies
//! - Keep the raw body as text and as a single URL-encoded string
//!
//! # Design Decisions
//! - Never fails: malformed input yields a `DecodeError` beside whatever was
//!   decoded, and the request carries on
//! - Multipart file contents are captured only up to a configured size;
//!   beyond that only metadata is kept
//! - XML becomes nested maps (`@attributes`, `#text`, one key per child tag).
//!   Entities other than the predefined five are rejected, never expanded

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures_util::stream;
use multer::Multipart;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{json, Map, Value};
use url::form_urlencoded;

/// Limits applied while decoding bodies.
#[derive(Debug, Clone, Copy)]
pub struct DecodeLimits {
    /// Multipart files larger than this are recorded as metadata only.
    pub max_file_capture_bytes: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_file_capture_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Why a body could not be fully decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON body: {0}")]
    Json(String),
    #[error("invalid multipart body: {0}")]
    Multipart(String),
    #[error("invalid XML body: {0}")]
    Xml(String),
    #[error("multipart body without a boundary")]
    MissingBoundary,
    #[error("body could not be read: {0}")]
    Read(String),
}

impl DecodeError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Json(_) => "json",
            DecodeError::Multipart(_) | DecodeError::MissingBoundary => "multipart",
            DecodeError::Xml(_) => "xml",
            DecodeError::Read(_) => "read",
        }
    }
}

/// Body encodings the decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Form,
    Multipart,
    Xml,
    Other,
}

impl BodyKind {
    /// Classify a Content-Type header value.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return BodyKind::Other;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/json" => BodyKind::Json,
            "application/x-www-form-urlencoded" => BodyKind::Form,
            "multipart/form-data" => BodyKind::Multipart,
            "application/xml" | "text/xml" => BodyKind::Xml,
            other if other.ends_with("+json") => BodyKind::Json,
            other if other.ends_with("+xml") => BodyKind::Xml,
            _ => BodyKind::Other,
        }
    }
}

/// Result of decoding a request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedBody {
    /// Structured form, when the content type was recognized.
    pub structured: Option<Value>,
    /// Body as UTF-8 text, or base64 when it is not valid UTF-8.
    pub raw_text: String,
    /// Verbatim body percent-encoded as one string.
    pub raw_urlencoded: String,
    /// Body size in bytes.
    pub size: usize,
    /// Decode failure, if any.
    pub error: Option<DecodeError>,
}

impl DecodedBody {
    /// A body that could not be read at all.
    pub fn unreadable(error: DecodeError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Decode a query string. Repeated keys collect into arrays.
pub fn decode_query(query: &str) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        insert_repeated(&mut map, key.into_owned(), Value::String(value.into_owned()));
    }
    map
}

/// Decode a body according to its declared content type.
pub async fn decode_body(
    content_type: Option<&str>,
    body: Bytes,
    limits: &DecodeLimits,
) -> DecodedBody {
    let mut decoded = DecodedBody {
        structured: None,
        raw_text: raw_text(&body),
        raw_urlencoded: form_urlencoded::byte_serialize(&body).collect(),
        size: body.len(),
        error: None,
    };

    match BodyKind::from_content_type(content_type) {
        BodyKind::Json => {
            if body.iter().all(u8::is_ascii_whitespace) {
                decoded.structured = Some(Value::Object(Map::new()));
            } else {
                match serde_json::from_slice::<Value>(&body) {
                    Ok(value) => decoded.structured = Some(value),
                    Err(e) => decoded.error = Some(DecodeError::Json(e.to_string())),
                }
            }
        }
        BodyKind::Form => {
            decoded.structured = Some(Value::Object(decode_query(&String::from_utf8_lossy(&body))));
        }
        BodyKind::Multipart => {
            let (fields, error) = match content_type.map(multer::parse_boundary) {
                Some(Ok(boundary)) => decode_multipart(body, boundary, limits).await,
                _ => (Map::new(), Some(DecodeError::MissingBoundary)),
            };
            decoded.structured = Some(Value::Object(fields));
            decoded.error = error;
        }
        BodyKind::Xml => {
            if body.iter().all(u8::is_ascii_whitespace) {
                decoded.structured = Some(Value::Object(Map::new()));
            } else {
                match decode_xml(&body) {
                    Ok(value) => decoded.structured = Some(value),
                    Err(message) => {
                        decoded.structured = Some(json!({
                            "_xml_parse_error": message,
                            "_raw": String::from_utf8_lossy(&body),
                        }));
                        decoded.error = Some(DecodeError::Xml(message));
                    }
                }
            }
        }
        BodyKind::Other => {}
    }

    if let Some(error) = &decoded.error {
        tracing::debug!(error = %error, "Request body decoded partially");
    }
    decoded
}

async fn decode_multipart(
    body: Bytes,
    boundary: String,
    limits: &DecodeLimits,
) -> (Map<String, Value>, Option<DecodeError>) {
    let body_stream = stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = Multipart::new(body_stream, boundary);
    let mut fields = Map::new();

    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return (fields, None),
            Err(e) => return (fields, Some(DecodeError::Multipart(e.to_string()))),
        };

        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(ToString::to_string);

        let Some(file_name) = file_name else {
            match field.text().await {
                Ok(text) => insert_repeated(&mut fields, name, Value::String(text)),
                Err(e) => return (fields, Some(DecodeError::Multipart(e.to_string()))),
            }
            continue;
        };

        let mut captured = Vec::new();
        let mut size = 0usize;
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    size += chunk.len();
                    if size <= limits.max_file_capture_bytes {
                        captured.extend_from_slice(&chunk);
                    } else {
                        captured = Vec::new();
                    }
                }
                Ok(None) => break,
                Err(e) => return (fields, Some(DecodeError::Multipart(e.to_string()))),
            }
        }

        let truncated = size > limits.max_file_capture_bytes;
        let mut file = json!({
            "filename": file_name,
            "content_type": content_type,
            "size": size,
            "truncated": truncated,
        });
        if !truncated {
            file["content"] = Value::String(STANDARD.encode(&captured));
        }
        insert_repeated(&mut fields, name, file);
    }
}

/// An element still open while the document is read.
struct XmlNode {
    tag: String,
    fields: Map<String, Value>,
    text: String,
}

impl XmlNode {
    fn open(start: &BytesStart<'_>) -> Result<Self, String> {
        let mut attributes = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| e.to_string())?;
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            attributes.insert(
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                Value::String(value.into_owned()),
            );
        }

        let mut fields = Map::new();
        if !attributes.is_empty() {
            fields.insert("@attributes".to_string(), Value::Object(attributes));
        }
        Ok(Self {
            tag: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            fields,
            text: String::new(),
        })
    }

    /// Leaf elements collapse to their text, or null when empty.
    fn into_value(self) -> Value {
        let mut fields = self.fields;
        let text = self.text.trim();
        if fields.is_empty() {
            return if text.is_empty() {
                Value::Null
            } else {
                Value::String(text.to_string())
            };
        }
        if !text.is_empty() {
            fields.insert("#text".to_string(), Value::String(text.to_string()));
        }
        Value::Object(fields)
    }
}

/// Parse an XML document into the value of its root element.
fn decode_xml(body: &[u8]) -> Result<Value, String> {
    let text = std::str::from_utf8(body).map_err(|e| e.to_string())?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut open: Vec<XmlNode> = Vec::new();
    let mut root: Option<Value> = None;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(start) => {
                if root.is_some() {
                    return Err("junk after document element".to_string());
                }
                open.push(XmlNode::open(&start)?);
            }
            Event::Empty(start) => {
                if root.is_some() {
                    return Err("junk after document element".to_string());
                }
                let node = XmlNode::open(&start)?;
                close_element(node, &mut open, &mut root);
            }
            Event::End(_) => {
                let node = open
                    .pop()
                    .ok_or_else(|| "closing tag without an open element".to_string())?;
                close_element(node, &mut open, &mut root);
            }
            Event::Text(content) => {
                let content = content.unescape().map_err(|e| e.to_string())?;
                match open.last_mut() {
                    Some(node) => node.text.push_str(&content),
                    None => return Err("text outside the document element".to_string()),
                }
            }
            Event::CData(data) => match open.last_mut() {
                Some(node) => node.text.push_str(&String::from_utf8_lossy(&data)),
                None => return Err("CDATA outside the document element".to_string()),
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(node) = open.last() {
        return Err(format!("unclosed element <{}>", node.tag));
    }
    root.ok_or_else(|| "no element found".to_string())
}

fn close_element(node: XmlNode, open: &mut [XmlNode], root: &mut Option<Value>) {
    let tag = node.tag.clone();
    let value = node.into_value();
    match open.last_mut() {
        Some(parent) => insert_repeated(&mut parent.fields, tag, value),
        None => *root = Some(value),
    }
}

/// Insert `value` under `key`, turning repeated keys into arrays.
fn insert_repeated(map: &mut Map<String, Value>, key: String, value: Value) {
    match map.get_mut(&key) {
        Some(Value::Array(values)) => values.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(key, value);
        }
    }
}

fn raw_text(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => STANDARD.encode(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "X-DEADEND-BOUNDARY";

    fn multipart_body(parts: &[(&str, Option<&str>, &str)]) -> Bytes {
        let mut body = String::new();
        for (name, file_name, content) in parts {
            body.push_str(&format!("--{BOUNDARY}\r\n"));
            match file_name {
                Some(file_name) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                )),
            }
            body.push_str(content);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        Bytes::from(body)
    }

    fn multipart_type() -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }

    #[test]
    fn classifies_content_types() {
        assert_eq!(BodyKind::from_content_type(Some("application/json")), BodyKind::Json);
        assert_eq!(
            BodyKind::from_content_type(Some("Application/JSON; charset=utf-8")),
            BodyKind::Json
        );
        assert_eq!(
            BodyKind::from_content_type(Some("application/vnd.api+json")),
            BodyKind::Json
        );
        assert_eq!(
            BodyKind::from_content_type(Some("application/x-www-form-urlencoded")),
            BodyKind::Form
        );
        assert_eq!(
            BodyKind::from_content_type(Some("multipart/form-data; boundary=abc")),
            BodyKind::Multipart
        );
        assert_eq!(BodyKind::from_content_type(Some("text/xml")), BodyKind::Xml);
        assert_eq!(
            BodyKind::from_content_type(Some("application/soap+xml; charset=utf-8")),
            BodyKind::Xml
        );
        assert_eq!(BodyKind::from_content_type(Some("text/plain")), BodyKind::Other);
        assert_eq!(BodyKind::from_content_type(None), BodyKind::Other);
    }

    #[test]
    fn repeated_query_keys_become_arrays() {
        let query = decode_query("a=1&a=2&b=x");
        assert_eq!(Value::Object(query), json!({"a": ["1", "2"], "b": "x"}));
    }

    #[test]
    fn query_tolerates_garbage() {
        let query = decode_query("%zz=%%&=empty&flag&c=%41");
        assert_eq!(query.get("flag"), Some(&json!("")));
        assert_eq!(query.get("c"), Some(&json!("A")));
        assert_eq!(query.get(""), Some(&json!("empty")));
    }

    #[tokio::test]
    async fn decodes_json_objects() {
        let decoded = decode_body(
            Some("application/json"),
            Bytes::from_static(br#"{"user":{"name":"admin"},"tags":[1,2]}"#),
            &DecodeLimits::default(),
        )
        .await;
        assert_eq!(
            decoded.structured,
            Some(json!({"user": {"name": "admin"}, "tags": [1, 2]}))
        );
        assert!(decoded.error.is_none());
    }

    #[tokio::test]
    async fn empty_json_body_is_empty_object() {
        let decoded =
            decode_body(Some("application/json"), Bytes::new(), &DecodeLimits::default()).await;
        assert_eq!(decoded.structured, Some(json!({})));
        assert_eq!(decoded.raw_text, "");
        assert_eq!(decoded.raw_urlencoded, "");
    }

    #[tokio::test]
    async fn malformed_json_is_a_diagnostic() {
        let decoded = decode_body(
            Some("application/json"),
            Bytes::from_static(b"{\"user\": "),
            &DecodeLimits::default(),
        )
        .await;
        assert!(decoded.structured.is_none());
        assert!(matches!(decoded.error, Some(DecodeError::Json(_))));
        assert_eq!(decoded.raw_text, "{\"user\": ");
    }

    #[tokio::test]
    async fn decodes_form_bodies() {
        let decoded = decode_body(
            Some("application/x-www-form-urlencoded"),
            Bytes::from_static(b"user=admin&pass=hunter2&pass=letmein"),
            &DecodeLimits::default(),
        )
        .await;
        assert_eq!(
            decoded.structured,
            Some(json!({"user": "admin", "pass": ["hunter2", "letmein"]}))
        );
        assert_eq!(decoded.raw_urlencoded, "user%3Dadmin%26pass%3Dhunter2%26pass%3Dletmein");
    }

    #[tokio::test]
    async fn decodes_xml_documents() {
        let decoded = decode_body(
            Some("application/xml"),
            Bytes::from_static(
                br#"<?xml version="1.0"?>
                <methodCall>
                  <methodName>wp.getUsersBlogs</methodName>
                  <params version="2">
                    <param><value>admin</value></param>
                    <param><value><![CDATA[p&ss]]></value></param>
                  </params>
                  <empty/>
                </methodCall>"#,
            ),
            &DecodeLimits::default(),
        )
        .await;

        assert!(decoded.error.is_none());
        assert_eq!(
            decoded.structured,
            Some(json!({
                "methodName": "wp.getUsersBlogs",
                "params": {
                    "@attributes": {"version": "2"},
                    "param": [{"value": "admin"}, {"value": "p&ss"}],
                },
                "empty": null,
            }))
        );
    }

    #[tokio::test]
    async fn xml_text_beside_attributes() {
        let decoded = decode_body(
            Some("text/xml"),
            Bytes::from_static(br#"<user role="admin &amp; ops">root</user>"#),
            &DecodeLimits::default(),
        )
        .await;
        assert_eq!(
            decoded.structured,
            Some(json!({"@attributes": {"role": "admin & ops"}, "#text": "root"}))
        );
    }

    #[tokio::test]
    async fn malformed_xml_keeps_raw_text() {
        let decoded = decode_body(
            Some("application/xml"),
            Bytes::from_static(b"<a><b>unclosed</a>"),
            &DecodeLimits::default(),
        )
        .await;

        let structured = decoded.structured.unwrap();
        assert!(structured["_xml_parse_error"].as_str().is_some());
        assert_eq!(structured["_raw"], "<a><b>unclosed</a>");
        assert!(matches!(decoded.error, Some(DecodeError::Xml(_))));
        assert_eq!(decoded.error.unwrap().kind(), "xml");
    }

    #[tokio::test]
    async fn xml_entities_are_not_expanded() {
        let decoded = decode_body(
            Some("application/xml"),
            Bytes::from_static(
                br#"<!DOCTYPE r [<!ENTITY xxe SYSTEM "file:///etc/passwd">]><r>&xxe;</r>"#,
            ),
            &DecodeLimits::default(),
        )
        .await;
        assert!(matches!(decoded.error, Some(DecodeError::Xml(_))));
        assert!(!decoded.structured.unwrap()["_raw"].as_str().unwrap().contains("root:"));
    }

    #[tokio::test]
    async fn unclosed_root_is_an_error() {
        let decoded = decode_body(
            Some("application/xml"),
            Bytes::from_static(b"<a><b>text</b>"),
            &DecodeLimits::default(),
        )
        .await;
        assert!(matches!(decoded.error, Some(DecodeError::Xml(_))));
    }

    #[tokio::test]
    async fn empty_xml_body_is_empty_object() {
        let decoded =
            decode_body(Some("text/xml"), Bytes::new(), &DecodeLimits::default()).await;
        assert_eq!(decoded.structured, Some(json!({})));
        assert!(decoded.error.is_none());
    }

    #[tokio::test]
    async fn multipart_text_field() {
        let decoded = decode_body(
            Some(&multipart_type()),
            multipart_body(&[("name", None, "value")]),
            &DecodeLimits::default(),
        )
        .await;
        assert_eq!(decoded.structured, Some(json!({"name": "value"})));
        assert!(decoded.error.is_none());
    }

    #[tokio::test]
    async fn multipart_files_are_metadata() {
        let decoded = decode_body(
            Some(&multipart_type()),
            multipart_body(&[("upload", Some("shell.php"), "<?php system($_GET['c']); ?>")]),
            &DecodeLimits::default(),
        )
        .await;

        let file = &decoded.structured.unwrap()["upload"];
        assert_eq!(file["filename"], "shell.php");
        assert_eq!(file["content_type"], "application/octet-stream");
        assert_eq!(file["size"], 28);
        assert_eq!(file["truncated"], false);
        assert_eq!(
            STANDARD.decode(file["content"].as_str().unwrap()).unwrap(),
            b"<?php system($_GET['c']); ?>"
        );
    }

    #[tokio::test]
    async fn oversized_files_drop_content() {
        let limits = DecodeLimits {
            max_file_capture_bytes: 4,
        };
        let decoded = decode_body(
            Some(&multipart_type()),
            multipart_body(&[("upload", Some("big.bin"), "0123456789")]),
            &limits,
        )
        .await;

        let file = &decoded.structured.unwrap()["upload"];
        assert_eq!(file["size"], 10);
        assert_eq!(file["truncated"], true);
        assert!(file.get("content").is_none());
    }

    #[tokio::test]
    async fn multipart_without_boundary() {
        let decoded = decode_body(
            Some("multipart/form-data"),
            Bytes::from_static(b"whatever"),
            &DecodeLimits::default(),
        )
        .await;
        assert_eq!(decoded.error, Some(DecodeError::MissingBoundary));
        assert_eq!(decoded.structured, Some(json!({})));
    }

    #[tokio::test]
    async fn unknown_types_keep_raw_body() {
        let decoded = decode_body(
            Some("text/xml"),
            Bytes::from_static(b"<a>1 & 2</a>"),
            &DecodeLimits::default(),
        )
        .await;
        assert!(decoded.structured.is_none());
        assert_eq!(decoded.raw_text, "<a>1 & 2</a>");
        assert_eq!(decoded.raw_urlencoded, "%3Ca%3E1+%26+2%3C%2Fa%3E");
        assert_eq!(decoded.size, 12);
    }

    #[tokio::test]
    async fn binary_bodies_are_base64() {
        let decoded = decode_body(
            None,
            Bytes::from_static(&[0xff, 0xfe, 0x00]),
            &DecodeLimits::default(),
        )
        .await;
        assert_eq!(decoded.raw_text, "//4A");
    }
}
