//! Response rendering subsystem.
//!
//! # Data Flow
//! ```text
//! ResponseConfig (from a route rule or the fallback)
//!     → ResponseTemplate::compile (once, at startup)
//!
//! ResponseTemplate + RequestContext
//!     → template.rs renders header values and body against the context scope
//!     → optional base64 decode of the rendered body
//!     → RenderedResponse (status, headers, bytes)
//! ```
//!
//! # Design Decisions
//! - Templates are parsed once when the router is built, never per request
//! - Rendering cannot fail: bad header values are skipped and a body that
//!   is not valid base64 is sent as rendered text

pub mod template;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;

use crate::config::ResponseConfig;
use crate::context::RequestContext;

pub use template::{PercentToken, Template};

/// A response rule compiled for repeated rendering.
#[derive(Debug, Clone)]
pub struct ResponseTemplate {
    pub status: StatusCode,
    pub media_type: String,
    pub headers: Vec<(HeaderName, Template)>,
    pub body: Template,
    pub base64: bool,
}

impl ResponseTemplate {
    /// Compile a response rule. Header names that are not valid HTTP
    /// header names are dropped with a warning.
    pub fn compile(config: &ResponseConfig) -> Self {
        let status = StatusCode::from_u16(config.status).unwrap_or_else(|_| {
            tracing::warn!(status = config.status, "Invalid response status, using 200");
            StatusCode::OK
        });

        let headers = config
            .headers
            .iter()
            .filter_map(|(name, value)| match HeaderName::try_from(name.as_str()) {
                Ok(name) => Some((name, Template::parse(value))),
                Err(_) => {
                    tracing::warn!(header = %name, "Skipping invalid response header name");
                    None
                }
            })
            .collect();

        Self {
            status,
            media_type: config.media_type.clone(),
            headers,
            body: Template::parse(&config.body),
            base64: config.base64,
        }
    }
}

/// Fully rendered response, ready to be turned into an HTTP response.
#[derive(Debug, Clone)]
pub struct RenderedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RenderedResponse {
    /// Body-less response with the given status.
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// Render a response template against a request context.
pub fn render_response(template: &ResponseTemplate, ctx: &RequestContext) -> RenderedResponse {
    let scope = ctx.template_scope();
    let mut headers = HeaderMap::new();

    if let Ok(value) = HeaderValue::from_str(&template.media_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }

    for (name, value_template) in &template.headers {
        let rendered = value_template.render(&scope);
        match HeaderValue::from_str(&rendered) {
            Ok(value) => {
                headers.insert(name.clone(), value);
            }
            Err(_) => {
                tracing::debug!(
                    request_id = %ctx.id,
                    header = %name,
                    "Rendered header value is not valid, skipping"
                );
            }
        }
    }

    let text = template.body.render(&scope);
    let body = if template.base64 {
        match STANDARD.decode(text.trim()) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                tracing::warn!(
                    request_id = %ctx.id,
                    error = %e,
                    "Response body is not valid base64, sending as text"
                );
                Bytes::from(text)
            }
        }
    } else {
        Bytes::from(text)
    };

    RenderedResponse {
        status: template.status,
        headers,
        body,
    }
}
