//! CRM backend access
//!
//! - [`CredentialStore`]: the process-wide bearer credential
//! - [`TokenRefresher`]: OAuth2 refresh-token grant against the login host
//! - [`CrmClient`]: authenticated GETs with a single refresh-and-retry on 401
//!
//! Query handlers depend on the [`Fetcher`] trait rather than the concrete
//! client so they can run against a scripted upstream.

mod client;
mod credential;
mod refresher;

pub use client::CrmClient;
pub use credential::{Credential, CredentialStore};
pub use refresher::TokenRefresher;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::Result;
use crate::failsafe::Unauthorized;

/// Fixed timeout for every upstream call
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw upstream answer: status plus body, payload left uninterpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    /// HTTP status
    pub status: StatusCode,
    /// Response body as text
    pub body: String,
}

impl UpstreamResponse {
    /// Build a response from parts
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Only a plain 200 counts as success for query endpoints
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }

    /// Decode the body as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

impl Unauthorized for UpstreamResponse {
    fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }
}

/// Authenticated read access to the CRM instance
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `path` (absolute, or relative to the instance URL) with bearer auth.
    ///
    /// Non-success statuses are returned, not raised.
    async fn authenticated_get(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<UpstreamResponse>;
}
