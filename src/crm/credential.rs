//! Bearer credential held for the whole process

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// The current access credential for the CRM instance
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    /// Short-lived bearer token
    pub bearer_token: Option<String>,
    /// Instance base URL that data calls go to
    pub instance_url: Option<String>,
    /// When the token was issued
    pub issued_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("instance_url", &self.instance_url)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Shared, lock-protected credential slot.
///
/// Readers take a snapshot; writers swap in a whole new [`Credential`]. The
/// lock is never held across an await point.
#[derive(Debug, Default)]
pub struct CredentialStore {
    current: RwLock<Credential>,
}

impl CredentialStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already knows the instance URL
    #[must_use]
    pub fn seeded(instance_url: Option<String>) -> Self {
        Self {
            current: RwLock::new(Credential {
                instance_url,
                ..Credential::default()
            }),
        }
    }

    /// Copy of the current credential
    pub fn snapshot(&self) -> Credential {
        self.current.read().clone()
    }

    /// Current bearer token, if any
    pub fn bearer_token(&self) -> Option<String> {
        self.current.read().bearer_token.clone()
    }

    /// Current instance URL, if any
    pub fn instance_url(&self) -> Option<String> {
        self.current.read().instance_url.clone()
    }

    /// Replace the credential wholesale
    pub fn replace(&self, credential: Credential) {
        *self.current.write() = credential;
    }
}
