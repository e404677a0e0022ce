//! OAuth2 refresh-token exchange
//!
//! Trades the long-lived refresh token for a new bearer token and installs
//! it in the [`CredentialStore`]. Rejections are reported, never retried here;
//! the retry bound lives in the fetcher.

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::UPSTREAM_TIMEOUT;
use super::credential::{Credential, CredentialStore};
use crate::config::CrmConfig;
use crate::{Error, Result};

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    instance_url: Option<String>,
}

/// Exchanges the configured refresh token for access tokens
pub struct TokenRefresher {
    /// HTTP client for token requests
    http_client: Client,
    /// Login host and secrets
    config: CrmConfig,
}

impl TokenRefresher {
    /// Create a refresher sharing the given HTTP client
    #[must_use]
    pub fn new(http_client: Client, config: CrmConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    /// Fetch a new access token and install it in `store`.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingCredentials`] if any secret is unset (no request is made)
    /// - [`Error::UpstreamAuth`] if the token endpoint answers anything but 200
    /// - [`Error::Http`] if the token endpoint cannot be reached
    pub async fn refresh(&self, store: &CredentialStore) -> Result<Credential> {
        let missing = self.config.missing_credentials();
        if !missing.is_empty() {
            warn!(missing = ?missing, "Cannot refresh access token: credentials not configured");
            return Err(Error::MissingCredentials(missing));
        }

        let token_url = self.config.token_url();
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.config.refresh_token.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        debug!(url = %token_url, "Requesting access token");
        let response = self
            .http_client
            .post(&token_url)
            .form(&params)
            .timeout(UPSTREAM_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "Token endpoint rejected refresh");
            return Err(Error::UpstreamAuth {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        let Some(access_token) = token.access_token.filter(|t| !t.is_empty()) else {
            warn!("Token response did not include an access token");
            return Err(Error::UpstreamAuth {
                status: status.as_u16(),
                body,
            });
        };

        let previous_instance = store.instance_url();
        let reported_instance = token.instance_url.filter(|url| !url.trim().is_empty());
        let instance_changed =
            reported_instance.is_some() && reported_instance != previous_instance;

        let credential = Credential {
            bearer_token: Some(access_token),
            instance_url: reported_instance.or(previous_instance),
            issued_at: Some(Utc::now()),
        };
        store.replace(credential.clone());

        info!(
            instance_url = credential.instance_url.as_deref().unwrap_or("<none>"),
            instance_changed,
            "Access token refreshed"
        );
        Ok(credential)
    }
}
