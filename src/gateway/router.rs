//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::{catch_panic::CatchPanicLayer, compression::CompressionLayer, trace::TraceLayer};
use tracing::{debug, error};

use super::middleware::{rate_limit_middleware, security_headers_middleware};
use crate::Error;
use crate::failsafe::ClientRateLimiter;
use crate::units::{UnitsService, error_envelope};

/// Shared application state
pub struct AppState {
    /// Query handlers
    pub units: Arc<UnitsService>,
    /// Per-client limiter for `/api/*`
    pub rate_limiter: Arc<ClientRateLimiter>,
}

/// `?refresh=` query parameter
#[derive(Debug, Default, Deserialize)]
pub struct RefreshParams {
    /// `1` or `true` bypasses the cache read
    #[serde(default)]
    pub refresh: Option<String>,
}

impl RefreshParams {
    /// Whether the caller asked to bypass the cache
    #[must_use]
    pub fn force_refresh(&self) -> bool {
        matches!(self.refresh.as_deref(), Some("1" | "true"))
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let rate_limiter = Arc::clone(&state.rate_limiter);

    Router::new()
        .route("/healthz", get(health_handler))
        .route("/api/units", get(units_handler))
        .route("/api/units/describe", get(describe_handler))
        .with_state(state)
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn units_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RefreshParams>,
) -> Response {
    let force = params.force_refresh();
    debug!(force_refresh = force, "GET /api/units");
    envelope_response(state.units.list_units(force).await)
}

async fn describe_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RefreshParams>,
) -> Response {
    let force = params.force_refresh();
    debug!(force_refresh = force, "GET /api/units/describe");
    envelope_response(state.units.describe_units(force).await)
}

/// Successful envelopes go out as 200; failures as `{ok: false}` with a
/// status mirroring the envelope's
fn envelope_response(result: crate::Result<serde_json::Value>) -> Response {
    match result {
        Ok(envelope) => (StatusCode::OK, Json(envelope)).into_response(),
        Err(e) => {
            log_failure(&e);
            (e.http_status(), Json(error_envelope(&e))).into_response()
        }
    }
}

fn log_failure(e: &Error) {
    if e.is_recoverable() {
        error!(error = %e, "Upstream failure with no cached fallback");
    } else {
        error!(error = %e, "Request failed");
    }
}
