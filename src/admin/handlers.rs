use std::net::IpAddr;

use axum::http::{header, HeaderValue, StatusCode};
use bytes::Bytes;
use serde::Serialize;

use crate::admin::auth::StatusAccess;
use crate::render::RenderedResponse;

#[derive(Serialize)]
pub struct ServiceStatus {
    pub service: &'static str,
}

/// `{"service":"ok"}` for allowed addresses, an empty 204 for everyone
/// else so the endpoint looks like any other dead path.
pub fn status_response(access: &StatusAccess, client_ip: IpAddr) -> RenderedResponse {
    if !access.allows(client_ip) {
        tracing::warn!(client_ip = %client_ip, "Status check denied");
        return RenderedResponse::empty(StatusCode::NO_CONTENT);
    }

    let body = serde_json::to_vec(&ServiceStatus { service: "ok" }).unwrap_or_default();
    let mut response = RenderedResponse::empty(StatusCode::OK);
    response
        .headers
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response.body = Bytes::from(body);
    response
}
