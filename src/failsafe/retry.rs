//! Bounded re-authentication retry
//!
//! A call that comes back unauthorized gets a credential refresh and one more
//! try, up to `max_retries` times. Anything else, including a final
//! unauthorized answer, is handed back to the caller unchanged.

use std::future::Future;

use tracing::debug;

use crate::Result;

/// Responses that can report an expired or revoked credential
pub trait Unauthorized {
    /// Whether the upstream rejected the credential
    fn is_unauthorized(&self) -> bool;
}

/// How many refresh-and-retry cycles a single call may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthRetryPolicy {
    /// Maximum refresh-and-retry cycles after the first attempt
    pub max_retries: u32,
}

impl Default for AuthRetryPolicy {
    fn default() -> Self {
        Self { max_retries: 1 }
    }
}

/// Execute `send`, refreshing and retrying on an unauthorized response.
///
/// # Errors
///
/// Returns the first error from `send` or `refresh`. An unauthorized response
/// that outlives the retry budget is returned as `Ok`.
pub async fn with_auth_retry<T, S, SFut, R, RFut>(
    policy: AuthRetryPolicy,
    name: &str,
    mut send: S,
    mut refresh: R,
) -> Result<T>
where
    T: Unauthorized,
    S: FnMut() -> SFut,
    SFut: Future<Output = Result<T>>,
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<()>>,
{
    let mut retries = 0u32;

    loop {
        let response = send().await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        if retries >= policy.max_retries {
            debug!(
                operation = name,
                retries = retries,
                "Still unauthorized after refresh, giving up"
            );
            return Ok(response);
        }

        retries += 1;
        debug!(operation = name, retry = retries, "Unauthorized, refreshing credential");
        refresh().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    struct Status(u16);

    impl Unauthorized for Status {
        fn is_unauthorized(&self) -> bool {
            self.0 == 401
        }
    }

    async fn run(policy: AuthRetryPolicy, script: &[u16]) -> (Result<Status>, u32, u32) {
        let sends = AtomicU32::new(0);
        let refreshes = AtomicU32::new(0);
        let result = with_auth_retry(
            policy,
            "test",
            || {
                let n = sends.fetch_add(1, Ordering::SeqCst) as usize;
                let status = script[n.min(script.len() - 1)];
                async move { Ok(Status(status)) }
            },
            || {
                refreshes.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
        )
        .await;
        (result, sends.load(Ordering::SeqCst), refreshes.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn success_needs_no_refresh() {
        let (result, sends, refreshes) = run(AuthRetryPolicy::default(), &[200]).await;
        assert_eq!(result.unwrap(), Status(200));
        assert_eq!((sends, refreshes), (1, 0));
    }

    #[tokio::test]
    async fn single_unauthorized_is_retried_once() {
        let (result, sends, refreshes) = run(AuthRetryPolicy::default(), &[401, 200]).await;
        assert_eq!(result.unwrap(), Status(200));
        assert_eq!((sends, refreshes), (2, 1));
    }

    #[tokio::test]
    async fn persistent_unauthorized_is_returned_not_looped() {
        let (result, sends, refreshes) = run(AuthRetryPolicy::default(), &[401]).await;
        assert_eq!(result.unwrap(), Status(401));
        assert_eq!((sends, refreshes), (2, 1));
    }

    #[tokio::test]
    async fn zero_budget_never_refreshes() {
        let (result, sends, refreshes) = run(AuthRetryPolicy { max_retries: 0 }, &[401]).await;
        assert_eq!(result.unwrap(), Status(401));
        assert_eq!((sends, refreshes), (1, 0));
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let (result, sends, refreshes) = run(AuthRetryPolicy::default(), &[500]).await;
        assert_eq!(result.unwrap(), Status(500));
        assert_eq!((sends, refreshes), (1, 0));
    }

    #[tokio::test]
    async fn refresh_error_propagates() {
        let result: Result<Status> = with_auth_retry(
            AuthRetryPolicy::default(),
            "test",
            || async { Ok(Status(401)) },
            || async {
                Err(Error::UpstreamAuth {
                    status: 400,
                    body: "invalid_grant".to_string(),
                })
            },
        )
        .await;
        assert!(matches!(result, Err(Error::UpstreamAuth { status: 400, .. })));
    }
}
