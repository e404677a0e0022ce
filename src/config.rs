//! Configuration management
//!
//! Layered with figment, lowest precedence first: built-in defaults, an
//! optional YAML file, the flat environment names the service has always
//! used (`SF_CLIENT_ID`, `CACHE_TTL_SECONDS`, `PORT`, ...), and finally
//! `UNITS_GATEWAY_` prefixed variables with `__` as the section separator.

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment, Metadata, Profile, Provider,
    providers::{Env, Format, Yaml},
    value::{Dict, Map, Value},
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

/// Schema metadata changes rarely, so describe responses never cache for
/// less than this.
pub const MIN_DESCRIBE_TTL: Duration = Duration::from_secs(300);

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// CRM connection and credentials
    pub crm: CrmConfig,
    /// Query cache configuration
    pub cache: CacheConfig,
    /// Per-client rate limiting
    pub rate_limit: RateLimitConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// CRM connection settings
///
/// Secrets default to empty; their absence is only reported when a token
/// refresh is attempted, so the server can still start and answer health
/// checks.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrmConfig {
    /// Login host serving `/services/oauth2/token`
    pub login_url: String,
    /// Connected app client id
    #[serde(deserialize_with = "string_or_number")]
    pub client_id: String,
    /// Connected app client secret
    #[serde(deserialize_with = "string_or_number")]
    pub client_secret: String,
    /// Long-lived refresh token
    #[serde(deserialize_with = "string_or_number")]
    pub refresh_token: String,
    /// Instance URL to use before the first refresh reports one
    pub instance_url: Option<String>,
    /// REST API version segment, e.g. `v61.0`
    pub api_version: String,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            login_url: "https://test.salesforce.com".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            instance_url: None,
            api_version: "v61.0".to_string(),
        }
    }
}

// Hand-written so secrets never reach the logs.
impl std::fmt::Debug for CrmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrmConfig")
            .field("login_url", &self.login_url)
            .field("client_id", &redact(&self.client_id))
            .field("client_secret", &redact(&self.client_secret))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("instance_url", &self.instance_url)
            .field("api_version", &self.api_version)
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() { "<unset>" } else { "<redacted>" }
}

impl CrmConfig {
    /// Names of the refresh credentials that are unset or blank
    #[must_use]
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("refresh_token", &self.refresh_token),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    /// Token endpoint derived from the login URL
    #[must_use]
    pub fn token_url(&self) -> String {
        format!("{}/services/oauth2/token", self.login_url.trim().trim_end_matches('/'))
    }

    /// Pre-seeded instance URL, if one is configured and non-blank
    #[must_use]
    pub fn seeded_instance_url(&self) -> Option<String> {
        self.instance_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
    }
}

/// Query cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default TTL in seconds for cached envelopes
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: 60 }
    }
}

impl CacheConfig {
    /// Default TTL for list queries
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// TTL for schema describe responses
    #[must_use]
    pub fn describe_ttl(&self) -> Duration {
        self.default_ttl().max(MIN_DESCRIBE_TTL)
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting on `/api` routes
    pub enabled: bool,
    /// Requests allowed per client IP per minute
    pub requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
        }
        Self::from_figment(Self::figment(path))
    }

    /// Build the provider stack without extracting it
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new();

        if let Some(p) = path {
            figment = figment.merge(Yaml::file(p));
        }

        figment
            .merge(legacy_env())
            .merge(VerbatimEnv::new(LEGACY_VERBATIM_VARS))
            .merge(Env::prefixed("UNITS_GATEWAY_").split("__"))
            .merge(VerbatimEnv::new(PREFIXED_VERBATIM_VARS))
    }

    /// Extract and normalize a configuration
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.crm.login_url = config.crm.login_url.trim().trim_end_matches('/').to_string();
        config.crm.instance_url = config.crm.seeded_instance_url();

        if config.crm.login_url.is_empty() {
            return Err(Error::Config("crm.login_url must not be empty".to_string()));
        }
        if config.crm.api_version.trim().is_empty() {
            return Err(Error::Config("crm.api_version must not be empty".to_string()));
        }

        Ok(config)
    }
}

/// Credentials and URLs must reach the config exactly as written; figment's
/// value parsing would turn `0123` into `123`.
const LEGACY_VERBATIM_VARS: &[(&str, &str)] = &[
    ("SF_CLIENT_ID", "client_id"),
    ("SF_CLIENT_SECRET", "client_secret"),
    ("SF_REFRESH_TOKEN", "refresh_token"),
    ("SF_INSTANCE_URL", "instance_url"),
];

const PREFIXED_VERBATIM_VARS: &[(&str, &str)] = &[
    ("UNITS_GATEWAY_CRM__CLIENT_ID", "client_id"),
    ("UNITS_GATEWAY_CRM__CLIENT_SECRET", "client_secret"),
    ("UNITS_GATEWAY_CRM__REFRESH_TOKEN", "refresh_token"),
    ("UNITS_GATEWAY_CRM__INSTANCE_URL", "instance_url"),
];

/// Provider for `crm` keys whose environment values are taken as plain
/// strings, bypassing figment's typed parsing
struct VerbatimEnv {
    vars: &'static [(&'static str, &'static str)],
}

impl VerbatimEnv {
    fn new(vars: &'static [(&'static str, &'static str)]) -> Self {
        Self { vars }
    }
}

impl Provider for VerbatimEnv {
    fn metadata(&self) -> Metadata {
        Metadata::named("verbatim environment variable(s)")
    }

    fn data(&self) -> figment::Result<Map<Profile, Dict>> {
        let crm: Dict = self
            .vars
            .iter()
            .filter_map(|&(var, key)| {
                Env::var(var)
                    .filter(|value| !value.is_empty())
                    .map(|value| (key.to_string(), Value::from(value)))
            })
            .collect();

        let mut dict = Dict::new();
        if !crm.is_empty() {
            dict.insert("crm".to_string(), Value::from(crm));
        }
        Ok(Map::from([(Profile::Default, dict)]))
    }
}

/// Accept a bare number where a string is expected, e.g. an unquoted
/// numeric secret in YAML
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Str(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Str(s) => s,
        Scalar::Unsigned(n) => n.to_string(),
        Scalar::Signed(n) => n.to_string(),
        Scalar::Float(n) => n.to_string(),
    })
}

/// Flat variable names carried over from earlier deployments
fn legacy_env() -> Env {
    Env::raw().filter_map(|key| {
        let mapped = match key.as_str().to_ascii_uppercase().as_str() {
            "SF_LOGIN_URL" => "crm.login_url",
            "SF_CLIENT_ID" => "crm.client_id",
            "SF_CLIENT_SECRET" => "crm.client_secret",
            "SF_REFRESH_TOKEN" => "crm.refresh_token",
            "SF_INSTANCE_URL" => "crm.instance_url",
            "SF_API_VERSION" => "crm.api_version",
            "CACHE_TTL_SECONDS" => "cache.ttl_seconds",
            "PORT" => "server.port",
            _ => return None,
        };
        Some(mapped.into())
    })
}
