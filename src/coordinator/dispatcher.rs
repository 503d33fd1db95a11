//! Round-robin reverse proxy in front of the workers
//!
//! Each request goes to the next worker in a fixed cyclic order. There is
//! no health checking: an unreachable worker costs that one request a 500
//! and stays in rotation.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, Response},
    response::IntoResponse,
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, Result};

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub struct Dispatcher {
    endpoints: Vec<String>,
    cursor: AtomicUsize,
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl Dispatcher {
    pub fn new(workers: &[SocketAddr], timeout: Duration, max_body_bytes: usize) -> Result<Self> {
        if workers.is_empty() {
            return Err(Error::InvalidConfig("dispatcher needs at least one worker".into()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoints: workers.iter().map(|addr| format!("http://{}", addr)).collect(),
            cursor: AtomicUsize::new(0),
            client,
            max_body_bytes,
        })
    }

    /// Pick the endpoint under the cursor and advance it by one, wrapping.
    pub fn next_endpoint(&self) -> (usize, &str) {
        let len = self.endpoints.len();
        let index = match self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some((c + 1) % len))
        {
            Ok(prev) | Err(prev) => prev,
        };
        (index, &self.endpoints[index])
    }

    /// Forward `request` to the next worker and relay its response.
    pub async fn forward(&self, request: Request<Body>) -> Response<Body> {
        let (index, endpoint) = self.next_endpoint();
        match self.proxy(endpoint, request).await {
            Ok(response) => response,
            Err(e @ Error::PayloadTooLarge(_)) => e.into_response(),
            Err(e) => {
                tracing::warn!("Worker {} failed to answer: {}", index, e);
                e.into_response()
            }
        }
    }

    async fn proxy(&self, endpoint: &str, request: Request<Body>) -> Result<Response<Body>> {
        let (parts, body) = request.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", endpoint, path);

        let declared = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.max_body_bytes) {
            return Err(Error::PayloadTooLarge(self.max_body_bytes));
        }
        // Past the length check the read only fails on an oversized chunked
        // body or a client that went away, and the latter never sees a reply.
        let body = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|_| Error::PayloadTooLarge(self.max_body_bytes))?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        // Set by the client for the outbound request.
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Upstream {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Creates the public router: every path is proxied.
pub fn create_router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .fallback(proxy_request)
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .with_state(dispatcher)
}

async fn proxy_request(
    State(dispatcher): State<Arc<Dispatcher>>,
    request: Request<Body>,
) -> Response<Body> {
    dispatcher.forward(request).await
}
