//! Request middleware: per-client rate limiting and response security headers

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderName, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;

use crate::failsafe::ClientRateLimiter;

/// Only paths under this prefix are rate limited
pub const RATE_LIMITED_PREFIX: &str = "/api/";

/// Content-Security-Policy sent with every response
pub const CONTENT_SECURITY_POLICY: &str = "default-src 'self' https: data:; \
     script-src 'self' 'unsafe-inline'; \
     style-src 'self' 'unsafe-inline' https://cdn.jsdelivr.net; \
     img-src 'self' data: https:; \
     connect-src 'self'; \
     frame-ancestors 'none'; \
     base-uri 'self'; \
     form-action 'self'";

const SECURITY_HEADERS: &[(&str, &str)] = &[
    (
        "strict-transport-security",
        "max-age=31536000; includeSubDomains; preload",
    ),
    ("x-frame-options", "DENY"),
    ("x-content-type-options", "nosniff"),
    ("referrer-policy", "no-referrer-when-downgrade"),
    ("content-security-policy", CONTENT_SECURITY_POLICY),
];

/// Reject `/api/*` requests over the per-address quota with 429.
///
/// The client address comes from [`ConnectInfo`]; requests without it (for
/// example when the router is driven directly in tests) share one bucket.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<ClientRateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if !path.starts_with(RATE_LIMITED_PREFIX) {
        return next.run(request).await;
    }

    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |info| info.0.ip());

    if limiter.try_acquire(client) {
        next.run(request).await
    } else {
        warn!(client = %client, path = %path, "Rate limit exceeded");
        rate_limited_response()
    }
}

/// Stamp the fixed security headers onto every response
pub async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for &(name, value) in SECURITY_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    response
}

fn rate_limited_response() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, "60")],
        Json(json!({
            "ok": false,
            "error": "Rate limit exceeded. Try again soon."
        })),
    )
        .into_response()
}
