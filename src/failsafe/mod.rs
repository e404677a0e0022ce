//! Failsafe mechanisms: bounded re-authentication retry and client rate limiting

mod rate_limiter;
mod retry;

pub use rate_limiter::ClientRateLimiter;
pub use retry::{AuthRetryPolicy, Unauthorized, with_auth_retry};
