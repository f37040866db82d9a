//! Response assembly.
//!
//! # Responsibilities
//! - Attach X-Request-ID to every response
//! - Convert a `RenderedResponse` into an axum response

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};

use crate::context::RequestId;
use crate::http::request::X_REQUEST_ID;
use crate::render::RenderedResponse;

pub fn set_request_id(response: &mut RenderedResponse, id: &RequestId) {
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response
            .headers
            .insert(HeaderName::from_static(X_REQUEST_ID), value);
    }
}

impl IntoResponse for RenderedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
