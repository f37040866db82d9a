//! Request extraction.
//!
//! # Responsibilities
//! - Turn axum request parts plus the resolved client address into an
//!   `InboundRequest`
//! - Measure URL length for the length limit
//! - Read the body under the configured size and time limits
//!
//! # Design Decisions
//! - Nothing here rejects a request; limits are reported to the caller,
//!   which still logs the attempt

use std::net::IpAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::uri::Authority;
use axum::http::{header, Uri};
use bytes::Bytes;
use http_body_util::LengthLimitError;
use percent_encoding::percent_decode_str;

use crate::context::InboundRequest;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Why a body could not be read in full.
#[derive(Debug, thiserror::Error)]
pub enum BodyReadError {
    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("body not received within {0:?}")]
    Timeout(Duration),
    #[error("body stream failed: {0}")]
    Incomplete(String),
}

pub fn inbound_request(parts: &Parts, client_ip: IpAddr) -> InboundRequest {
    let authority = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .and_then(|host| host.parse::<Authority>().ok())
        .or_else(|| parts.uri.authority().cloned());

    InboundRequest {
        method: parts.method.as_str().to_string(),
        path: decoded_path(parts.uri.path()),
        query: parts.uri.query().unwrap_or_default().to_string(),
        headers: parts.headers.clone(),
        client_ip,
        protocol: parts.uri.scheme_str().unwrap_or("http").to_string(),
        host: authority
            .as_ref()
            .map(|a| a.host().to_string())
            .unwrap_or_default(),
        port: authority.as_ref().and_then(Authority::port_u16),
    }
}

/// Percent-decoded request path; invalid UTF-8 is replaced, not rejected.
pub fn decoded_path(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Length of path plus query, the way it appears in the request line.
pub fn url_length(uri: &Uri) -> usize {
    uri.path_and_query().map(|pq| pq.as_str().len()).unwrap_or(0)
}

/// Collect the body, bounded in size and time.
pub async fn read_body(body: Body, limit: usize, deadline: Duration) -> Result<Bytes, BodyReadError> {
    match tokio::time::timeout(deadline, axum::body::to_bytes(body, limit)).await {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(e)) => {
            let source = e.into_inner();
            if source.downcast_ref::<LengthLimitError>().is_some() {
                Err(BodyReadError::TooLarge { limit })
            } else {
                Err(BodyReadError::Incomplete(source.to_string()))
            }
        }
        Err(_) => Err(BodyReadError::Timeout(deadline)),
    }
}
