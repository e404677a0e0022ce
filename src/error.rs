//! Error types for the units gateway

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for the units gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Units gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// One or more refresh credentials are not configured
    #[error("Missing credentials: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),

    /// Token endpoint rejected the refresh grant
    #[error("Refresh failed: HTTP {status} - {body}")]
    UpstreamAuth {
        /// Status returned by the token endpoint
        status: u16,
        /// Raw response body
        body: String,
    },

    /// Data endpoint returned a non-success status
    #[error("Upstream fetch failed: HTTP {status} - {body}")]
    UpstreamFetch {
        /// Status returned by the data endpoint
        status: u16,
        /// Raw response body, passed through verbatim
        body: String,
    },

    /// Network failure talking to the data endpoint
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a query handler may answer this failure from a stale cache entry.
    ///
    /// Only data-endpoint failures qualify. Configuration and token-endpoint
    /// errors always reach the caller.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UpstreamFetch { .. } | Self::Transport(_))
    }

    /// HTTP status used for the `ok: false` envelope
    #[must_use]
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::UpstreamFetch { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::UpstreamAuth { .. } | Self::Transport(_) | Self::Http(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message placed in the envelope's `error` field.
    ///
    /// Upstream bodies are surfaced untouched so operators see exactly what
    /// the backend said.
    #[must_use]
    pub fn envelope_message(&self) -> String {
        match self {
            Self::UpstreamFetch { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }
}
