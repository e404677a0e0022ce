//! Units Gateway Library
//!
//! Read-only HTTP gateway in front of a CRM instance's `Unit__c` records.
//!
//! # Features
//!
//! - **Credential refresh**: OAuth2 refresh-token grant, lazily on first use
//! - **Bounded retry**: a 401 triggers one refresh and one retry, never more
//! - **TTL cache**: envelopes cached per key, served stale when the backend fails
//! - **Failsafes**: per-client rate limiting, fixed upstream timeouts
//! - **Production Ready**: security headers, structured logging, graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod crm;
pub mod error;
pub mod failsafe;
pub mod gateway;
pub mod units;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))
}
