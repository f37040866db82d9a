//! HTTP server setup and the decoy handler.
//!
//! # Responsibilities
//! - Create Axum Router with a catch-all handler for every method and path
//! - Wire up middleware (tracing, timeout) and the in-flight request limit
//! - Bind server to listener with graceful shutdown
//! - Per request: resolve client, decode, match, render, count, then hand
//!   the exchange to the shipper, which builds the record in the background

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::{StatusEndpoint, STATUS_ROUTE_ID};
use crate::config::{DeadendConfig, LimitsConfig};
use crate::context::{decode_body, DecodeError, DecodeLimits, DecodedBody, RequestContext};
use crate::gelf::{Exchange, Shipper};
use crate::http::request::{inbound_request, read_body, url_length, BodyReadError};
use crate::http::response::set_request_id;
use crate::lifecycle::Shutdown;
use crate::observability::{metrics, RequestStats};
use crate::render::{render_response, RenderedResponse, ResponseTemplate};
use crate::routing::{MatchedVars, RouteMatch, Router as DecoyRouter, RouterError};
use crate::security::headers::ClientAddrResolver;

/// Route id reported for requests rejected before matching.
pub const REJECTED_ROUTE_ID: &str = "rejected";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<DecoyRouter>,
    pub status: Arc<StatusEndpoint>,
    pub resolver: ClientAddrResolver,
    pub shipper: Shipper,
    pub stats: Arc<RequestStats>,
    pub limits: LimitsConfig,
    /// Bounds requests in flight; excess requests wait for a slot.
    pub slots: Arc<Semaphore>,
}

impl AppState {
    pub fn from_config(
        config: &DeadendConfig,
        shipper: Shipper,
        stats: Arc<RequestStats>,
    ) -> Result<Self, RouterError> {
        let router = DecoyRouter::from_config(&config.routes, &config.fallback)?;
        tracing::info!(routes = router.len(), "Route rules compiled");

        Ok(Self {
            router: Arc::new(router),
            status: Arc::new(StatusEndpoint::from_config(&config.status)),
            resolver: ClientAddrResolver::from_config(&config.proxy),
            shipper,
            stats,
            limits: config.limits.clone(),
            slots: Arc::new(Semaphore::new(config.listener.max_connections.max(1))),
        })
    }

    fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_file_capture_bytes: self.limits.max_file_capture_bytes,
        }
    }
}

/// HTTP server for the decoy.
pub struct HttpServer {
    router: Router,
    config: DeadendConfig,
}

impl HttpServer {
    pub fn new(config: DeadendConfig, state: AppState) -> Self {
        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &DeadendConfig, state: AppState) -> Router {
        Router::new()
            .route("/", any(decoy_handler))
            .route("/{*path}", any(decoy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.limits.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// The configured axum router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &DeadendConfig {
        &self.config
    }
}

/// Entry point for every request.
///
/// The work runs on its own task so that a client hanging up mid-request
/// does not cancel logging of what was already received.
async fn decoy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let Ok(permit) = Arc::clone(&state.slots).acquire_owned().await else {
        return StatusCode::NO_CONTENT.into_response();
    };
    let task = tokio::spawn(async move {
        let response = handle(state, peer, request).await;
        drop(permit);
        response
    });
    match task.await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Request task failed");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

enum Answer<'a> {
    Reject(StatusCode),
    Status,
    Decoy(&'a ResponseTemplate),
}

async fn handle(state: AppState, peer: SocketAddr, request: Request<Body>) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let client_ip: IpAddr = state.resolver.resolve(peer.ip(), &parts.headers);
    let inbound = inbound_request(&parts, client_ip);

    let url_len = url_length(&parts.uri);
    let url_too_long = url_len > state.limits.max_url_length;
    if url_too_long {
        tracing::warn!(
            client_ip = %client_ip,
            url_length = url_len,
            limit = state.limits.max_url_length,
            "URL exceeds length limit"
        );
    }

    let deadline = Duration::from_secs(state.limits.request_timeout_secs);
    let mut body_too_large = false;
    let decoded = match read_body(body, state.limits.max_body_bytes, deadline).await {
        Ok(bytes) => {
            let content_type = parts.headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok());
            decode_body(content_type, bytes, &state.decode_limits()).await
        }
        Err(e) => {
            body_too_large = matches!(e, BodyReadError::TooLarge { .. });
            tracing::warn!(client_ip = %client_ip, error = %e, "Request body not read");
            DecodedBody::unreadable(DecodeError::Read(e.to_string()))
        }
    };
    if let Some(error) = &decoded.error {
        metrics::record_decode_error(error.kind());
        tracing::debug!(client_ip = %client_ip, error = %error, "Body decoded with errors");
    }

    let (route_id, vars, answer) = if url_too_long {
        (REJECTED_ROUTE_ID, MatchedVars::new(), Answer::Reject(StatusCode::URI_TOO_LONG))
    } else if body_too_large {
        (REJECTED_ROUTE_ID, MatchedVars::new(), Answer::Reject(StatusCode::PAYLOAD_TOO_LARGE))
    } else if state.status.handles(&inbound.method, &inbound.path) {
        (STATUS_ROUTE_ID, MatchedVars::new(), Answer::Status)
    } else {
        let RouteMatch { route, vars } = state.router.match_request(&inbound.method, &inbound.path);
        (route.id.as_str(), vars, Answer::Decoy(&route.response))
    };

    let ctx = RequestContext::build(&inbound, decoded, vars);

    let mut rendered = match answer {
        Answer::Reject(status) => RenderedResponse::empty(status),
        Answer::Status => state.status.respond(client_ip),
        Answer::Decoy(template) => render_response(template, &ctx),
    };
    set_request_id(&mut rendered, &ctx.id);

    let status = rendered.status.as_u16();
    let response_size = rendered.body.len();

    tracing::debug!(
        request_id = %ctx.id,
        client_ip = %ctx.client_ip,
        method = %ctx.method,
        path = %ctx.path,
        route = %route_id,
        status,
        "Request answered"
    );

    if !state.status.is_local_check(&ctx.path, client_ip) {
        state
            .stats
            .record(&ctx.path, &ctx.client_ip, status, ctx.request_size, response_size);
        metrics::record_request(&ctx.method, status, route_id, start);

        let exchange = Exchange {
            route_id: route_id.to_string(),
            status,
            response_size,
            duration: start.elapsed(),
        };
        state.shipper.ship_exchange(ctx, exchange);
    }

    rendered.into_response()
}
