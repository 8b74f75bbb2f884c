//! HTTP proxy logic
//!
//! Receives inbound requests from the app, strips hop-by-hop headers and any
//! caller credentials, and forwards them to the backend through the
//! authenticated client. Backend responses are returned verbatim, including
//! error statuses; only failures the client itself reports become gateway
//! error bodies.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::FromRequest;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use kisan_client::{AuthenticatedHttpClient, Error as ClientError, LoginRedirect, RequestSpec};
use tracing::{error, instrument, warn};

/// Inbound body limit; crop images for diagnosis are the largest payloads.
///
/// Enforced router-wide through `DefaultBodyLimit`.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Shared state passed to the proxy handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    pub client: Arc<AuthenticatedHttpClient>,
    pub redirect: Arc<LoginRedirect>,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub in_flight: Arc<AtomicU64>,
}

/// JSON error body: {"error":{"type":"...","message":"...","request_id":"req_..."}}
///
/// `login` is added when the user has to sign in again.
fn error_response(
    status: StatusCode,
    kind: &str,
    message: &str,
    request_id: &str,
    login: Option<&str>,
) -> Response {
    let mut error = serde_json::json!({
        "type": kind,
        "message": message,
        "request_id": request_id,
    });
    if let Some(login) = login {
        error["login"] = serde_json::Value::String(login.to_string());
    }
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::json!({ "error": error }).to_string(),
    )
        .into_response()
}

/// HTTP status for a client failure.
fn status_for(err: &ClientError) -> StatusCode {
    match err {
        ClientError::AuthenticationRequired(_) | ClientError::RetryExhausted { .. } => {
            StatusCode::UNAUTHORIZED
        }
        ClientError::Transport(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
        ClientError::Transport(_) => StatusCode::BAD_GATEWAY,
        ClientError::RefreshWaitTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ClientError::RefreshInterrupted => StatusCode::SERVICE_UNAVAILABLE,
        ClientError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
    }
}

/// Error type for an inbound body that could not be buffered.
fn body_rejection_kind(status: StatusCode) -> &'static str {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        "payload_too_large"
    } else {
        "invalid_request"
    }
}

/// Decrements the in-flight gauge however the handler exits.
struct InFlight<'a>(&'a AtomicU64);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Forward an inbound request to the backend through the authenticated client.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    state.requests_total.fetch_add(1, Ordering::Relaxed);
    let _in_flight = InFlight::enter(&state.in_flight);
    let started = Instant::now();

    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let headers = forwardable_headers(request.headers());

    let response = match Bytes::from_request(request, &()).await {
        Ok(body) => {
            let spec = RequestSpec::new(method.clone(), path)
                .with_headers(headers)
                .with_body(body);
            forward(state, spec, &request_id).await
        }
        Err(rejection) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            let status = rejection.status();
            let kind = body_rejection_kind(status);
            warn!(status = status.as_u16(), kind, "inbound body rejected");
            error_response(status, kind, &rejection.body_text(), &request_id, None)
        }
    };

    crate::metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn forward(state: &ProxyState, spec: RequestSpec, request_id: &str) -> Response {
    match state.client.request(spec).await {
        Ok(backend) => {
            let mut response = Response::builder().status(backend.status);
            for (name, value) in &backend.headers {
                if !is_hop_by_hop(name.as_str()) {
                    response = response.header(name, value);
                }
            }
            response
                .body(axum::body::Body::from(backend.body))
                .unwrap_or_else(|e| {
                    error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal_error",
                        &format!("response build error: {e}"),
                        request_id,
                        None,
                    )
                })
        }
        Err(e) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_upstream_error(e.kind());
            let status = status_for(&e);
            let login = matches!(e, ClientError::AuthenticationRequired(_))
                .then(|| state.redirect.login_path());
            if status.is_server_error() {
                error!(error = %e, kind = e.kind(), "backend call failed");
            } else {
                warn!(error = %e, kind = e.kind(), "backend call rejected");
            }
            error_response(status, e.kind(), &e.to_string(), request_id, login)
        }
    }
}

/// Inbound headers minus hop-by-hop, `host` and `authorization`.
fn forwardable_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        if is_hop_by_hop(name.as_str()) || name == header::HOST || name == header::AUTHORIZATION {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
