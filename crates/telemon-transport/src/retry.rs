//! Retry loop shared by both transports.
//!
//! The loop is a small state machine: `Attempting` runs one call, a
//! retriable failure moves to `Waiting`, which sleeps while racing the
//! cancellation token, and the loop ends in `Success` or `Failed`.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, TransportError};

/// Attempts allowed beyond the first call, unless configured otherwise.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Unit of the backoff sequence `1, 3, 5, ...`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Wait before retry number `retry` (1-based): `base * (2 * retry - 1)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use telemon_transport::retry::RetryPolicy;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.delay_for(1), Duration::from_secs(1));
    /// assert_eq!(policy.delay_for(3), Duration::from_secs(5));
    /// ```
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * (2 * retry.max(1) - 1)
    }
}

enum State<T> {
    Attempting(u32),
    Waiting { attempt: u32, delay: Duration },
    Success(T),
    Failed(TransportError),
}

/// Runs `op` until it succeeds, fails with an error `is_retriable` rejects,
/// or `policy.max_retries` retries are used up.
///
/// `op` receives the 1-based attempt number. An attempt in flight is never
/// interrupted; cancellation is observed before each attempt and during the
/// wait between attempts, and yields [`TransportError::Cancelled`].
pub async fn retry<T, F, Fut, C>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    is_retriable: C,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&TransportError) -> bool,
{
    let mut state = State::Attempting(1);
    loop {
        state = match state {
            State::Attempting(attempt) => {
                if cancel.is_cancelled() {
                    State::Failed(TransportError::Cancelled)
                } else {
                    match op(attempt).await {
                        Ok(value) => State::Success(value),
                        Err(e) if !is_retriable(&e) => {
                            tracing::warn!(attempt, error = %e, "Non-retriable error, giving up");
                            State::Failed(e)
                        }
                        Err(e) if attempt > policy.max_retries => State::Failed(TransportError::Exhausted {
                            attempts: attempt,
                            source: Box::new(e),
                        }),
                        Err(e) => {
                            let delay = policy.delay_for(attempt);
                            tracing::warn!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "Attempt failed, retrying"
                            );
                            State::Waiting { attempt, delay }
                        }
                    }
                }
            }
            State::Waiting { attempt, delay } => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => State::Attempting(attempt + 1),
                    _ = cancel.cancelled() => State::Failed(TransportError::Cancelled),
                }
            }
            State::Success(value) => return Ok(value),
            State::Failed(e) => return Err(e),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1))
    }

    #[test]
    fn backoff_sequence_is_odd_multiples() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        let delays: Vec<u128> = (1..=4).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 300, 500, 700]);
    }

    #[tokio::test]
    async fn always_failing_call_runs_max_retries_plus_one_times() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = retry(&fast(3), &CancellationToken::new(), TransportError::is_retriable, move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Io(ErrorKind::TimedOut.into()))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(TransportError::Exhausted { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*source, TransportError::Io(_)));
            }
            other => panic!("expected exhausted error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_refused_is_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry(&fast(3), &CancellationToken::new(), TransportError::is_retriable, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(TransportError::Io(ErrorKind::ConnectionRefused.into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn uncategorized_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = retry(&fast(3), &CancellationToken::new(), TransportError::is_retriable, move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Other("bad payload".to_string()))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(TransportError::Other(_))));
    }

    #[tokio::test]
    async fn cancellation_during_wait_stops_without_another_attempt() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(3, Duration::from_secs(30));

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let counter = &calls;
        let started = std::time::Instant::now();
        let result: Result<()> = retry(&policy, &cancel, TransportError::is_retriable, move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Io(ErrorKind::TimedOut.into()))
        })
        .await;

        assert!(matches!(result, Err(TransportError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancelled_token_prevents_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = retry(&fast(3), &cancel, |_| true, move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(TransportError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
