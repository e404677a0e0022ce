//! Authenticated CRM REST client

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::credential::CredentialStore;
use super::refresher::TokenRefresher;
use super::{Fetcher, UPSTREAM_TIMEOUT, UpstreamResponse};
use crate::config::CrmConfig;
use crate::failsafe::{AuthRetryPolicy, with_auth_retry};
use crate::{Error, Result};

/// Read-only client for the CRM instance.
///
/// Refreshes lazily: the first call (or the first call without an instance
/// URL) triggers a token exchange, and a 401 triggers exactly one more.
pub struct CrmClient {
    /// HTTP client shared with the refresher
    http_client: Client,
    /// Token exchange
    refresher: TokenRefresher,
    /// Current credential
    credentials: Arc<CredentialStore>,
    /// Refresh-and-retry budget per call
    retry_policy: AuthRetryPolicy,
}

impl CrmClient {
    /// Create a client, seeding the credential store from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &CrmConfig) -> Result<Self> {
        let credentials = Arc::new(CredentialStore::seeded(config.seeded_instance_url()));
        Self::with_credentials(config, credentials)
    }

    /// Create a client around an existing credential store
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_credentials(config: &CrmConfig, credentials: Arc<CredentialStore>) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .user_agent(concat!("units-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            refresher: TokenRefresher::new(http_client.clone(), config.clone()),
            http_client,
            credentials,
            retry_policy: AuthRetryPolicy::default(),
        })
    }

    /// Override the refresh-and-retry budget
    #[must_use]
    pub fn with_retry_policy(mut self, policy: AuthRetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// The credential store this client reads and refreshes
    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Exchange the refresh token for a new access token
    ///
    /// # Errors
    ///
    /// See [`TokenRefresher::refresh`].
    pub async fn refresh(&self) -> Result<()> {
        self.refresher.refresh(&self.credentials).await.map(|_| ())
    }

    /// One GET with the current token, no retry
    async fn send_once(&self, path: &str, query: &[(&str, &str)]) -> Result<UpstreamResponse> {
        let credential = self.credentials.snapshot();
        let token = credential
            .bearer_token
            .ok_or_else(|| Error::Internal("No bearer token after refresh".to_string()))?;
        let base = credential.instance_url.ok_or_else(|| {
            Error::Config(
                "No instance URL: the token response did not include one and none is configured"
                    .to_string(),
            )
        })?;
        let url = resolve_url(&base, path);

        let mut request = self
            .http_client
            .get(&url)
            .bearer_auth(token)
            .timeout(UPSTREAM_TIMEOUT);
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("GET {url} failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("Reading response from {url} failed: {e}")))?;

        if status == StatusCode::UNAUTHORIZED {
            warn!(url = %url, "Upstream rejected bearer token");
        } else {
            debug!(url = %url, status = status.as_u16(), "Upstream responded");
        }

        Ok(UpstreamResponse { status, body })
    }
}

#[async_trait]
impl Fetcher for CrmClient {
    async fn authenticated_get(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<UpstreamResponse> {
        if self.credentials.bearer_token().is_none() {
            debug!("No access token yet, refreshing");
            self.refresh().await?;
        }
        if self.credentials.instance_url().is_none() {
            debug!("No instance URL known, refreshing");
            self.refresh().await?;
        }

        with_auth_retry(
            self.retry_policy,
            path,
            || self.send_once(path, query),
            || self.refresh(),
        )
        .await
    }
}

/// Join `path` onto `base` unless it is already absolute
fn resolve_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
