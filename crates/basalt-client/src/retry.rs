//! Bounded retry for operations racing cluster startup.
//!
//! A cluster that reports ready only guarantees reachable masters; worker
//! registration lands asynchronously, so worker-dependent operations can
//! fail transiently right after startup. The contract is a bounded
//! retry-until-deadline loop: transient failures are retried on a fixed
//! interval, fatal failures and the deadline end the loop immediately.

use std::time::{Duration, Instant};

use crate::error::{ClientError, Result};

/// Wall-clock budget and pacing for a retry loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total wall-clock budget.
    pub timeout: Duration,

    /// Pause between attempts.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_millis(250),
        }
    }
}

/// Runs `op` until it succeeds, fails fatally, or the deadline elapses.
///
/// Only errors classified transient by [`ClientError::is_transient`] are
/// retried. On deadline the loop fails with
/// [`ClientError::DeadlineElapsed`] carrying the last transient error, so
/// the failure is deterministic rather than a hang.
pub async fn until_deadline<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                if Instant::now() + policy.interval >= deadline {
                    return Err(ClientError::DeadlineElapsed {
                        attempts,
                        last: Box::new(err),
                    });
                }
                tracing::debug!(attempts, error = %err, "transient failure, retrying");
                tokio::time::sleep(policy.interval).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(200),
            interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn converges_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = until_deadline(quick_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(ClientError::Unavailable("not yet".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn fatal_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = until_deadline(quick_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClientError::NotFound("/a".into())) }
        })
        .await;
        assert!(matches!(result, Err(ClientError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deadline_ends_persistent_transients() {
        let result: Result<()> = until_deadline(quick_policy(), || async {
            Err(ClientError::Unavailable("never".into()))
        })
        .await;
        match result {
            Err(ClientError::DeadlineElapsed { attempts, last }) => {
                assert!(attempts >= 1);
                assert!(matches!(*last, ClientError::Unavailable(_)));
            }
            other => panic!("expected DeadlineElapsed, got {other:?}"),
        }
    }
}
