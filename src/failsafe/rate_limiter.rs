//! Per-client rate limiting

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

use governor::{
    Quota, RateLimiter as GovernorLimiter, clock::DefaultClock,
    state::keyed::DefaultKeyedStateStore,
};

use tracing::debug;

use crate::config::RateLimitConfig;

type KeyedLimiter = GovernorLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Acquisitions between two sweeps of idle client state
pub const PRUNE_EVERY: u64 = 1024;

/// Rate limiter keyed by client address
///
/// One state cell exists per client address seen. Every [`PRUNE_EVERY`]
/// acquisitions the cells of clients whose quota has fully replenished are
/// dropped, so the map only holds clients active within the last window.
pub struct ClientRateLimiter {
    /// `None` when rate limiting is disabled
    inner: Option<KeyedLimiter>,
    /// Acquisitions since creation
    acquisitions: AtomicU64,
}

impl ClientRateLimiter {
    /// Create a new rate limiter
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let quota = config.enabled.then(|| {
            let per_minute =
                NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
            Quota::per_minute(per_minute)
        });
        Self::from_quota(quota)
    }

    /// A limiter that admits everything
    #[must_use]
    pub fn disabled() -> Self {
        Self::from_quota(None)
    }

    fn from_quota(quota: Option<Quota>) -> Self {
        Self {
            inner: quota.map(GovernorLimiter::keyed),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Try to acquire a permit for `client`
    pub fn try_acquire(&self, client: IpAddr) -> bool {
        let Some(limiter) = self.inner.as_ref() else {
            return true;
        };

        let allowed = limiter.check_key(&client).is_ok();
        if (self.acquisitions.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_EVERY == 0 {
            self.prune();
        }
        allowed
    }

    /// Drop state for clients whose quota has fully replenished
    pub fn prune(&self) {
        if let Some(limiter) = self.inner.as_ref() {
            let before = limiter.len();
            limiter.retain_recent();
            limiter.shrink_to_fit();
            debug!(before, after = limiter.len(), "Pruned idle rate limit state");
        }
    }

    /// Number of client addresses currently tracked
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.inner.as_ref().map_or(0, KeyedLimiter::len)
    }

    /// Whether limiting is active
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }
}
