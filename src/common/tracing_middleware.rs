//! Request id propagation and per-request logging
//!
//! Every request gets an `X-Request-ID` (reused when the client or the
//! dispatcher already set one), a span carrying it, and a completion log line
//! with status and duration.

use axum::{
    body::Body,
    http::{HeaderValue, Request, Response},
    middleware::Next,
};
use std::time::Instant;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// Header name for request ID
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Generate a new unique request ID
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Request id already on the request, if any.
pub fn request_id_of<B>(request: &Request<B>) -> Option<String> {
    request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Middleware that tags each request with an id and logs its outcome.
///
/// The id is written back onto the request so that proxied requests carry it
/// to the worker.
pub async fn request_tracing_middleware(mut request: Request<Body>, next: Next) -> Response<Body> {
    let start = Instant::now();

    let request_id = request_id_of(&request).unwrap_or_else(generate_request_id);
    let header = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header {
        request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let mut response = next.run(request).instrument(span.clone()).await;

    let duration = start.elapsed();
    let status = response.status();

    if let Some(value) = header {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let _guard = span.enter();
    if status.is_success() {
        info!(
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request completed"
        );
    } else if status.is_client_error() {
        warn!(
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Client error"
        );
    } else {
        warn!(
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Server error"
        );
    }

    response
}
