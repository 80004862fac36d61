//! Connection resilience: bounded retry with exponential backoff
//!
//! The schedule is an explicit [`Backoff`] value so it can be inspected and
//! tested without any database. [`with_retry`] re-runs a whole operation on
//! transient failure; callers make sure each operation is an atomic unit (or a
//! plain read) and acquires its connection inside the attempt, so nothing is
//! held across the sleep.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{LoadError, LoadResult};

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Give up once the next attempt would start after this much time
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            deadline: None,
        }
    }
}

impl RetryPolicy {
    /// Policy from configured retry counts: `max_retries` excludes the first try
    pub fn from_retries(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            max_attempts: max_retries.saturating_add(1),
            deadline: None,
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempt: 0,
            deadline: self.deadline.map(|d| Instant::now() + d),
        }
    }
}

/// Retry state of one operation: attempts so far, next delay, deadline
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
    deadline: Option<Instant>,
}

impl Backoff {
    /// Failed attempts recorded so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay that the next failure would produce
    pub fn next_delay(&self) -> Duration {
        self.policy.delay_for(self.attempt)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Record a failed attempt.
    ///
    /// Returns how long to wait before trying again, or `None` once the
    /// attempt budget or the deadline is spent.
    pub fn on_failure(&mut self) -> Option<Duration> {
        let delay = self.next_delay();
        self.attempt += 1;

        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() + delay > deadline {
                return None;
            }
        }
        Some(delay)
    }
}

/// Run `op`, retrying transient failures per `policy`.
///
/// Non-transient errors return immediately. When retries run out the last
/// error is wrapped in [`LoadError::RetriesExhausted`].
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> LoadResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LoadResult<T>>,
{
    let mut backoff = policy.backoff();

    loop {
        match op().await {
            Ok(value) => {
                if backoff.attempt() > 0 {
                    debug!(operation, retries = backoff.attempt(), "Recovered after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() => match backoff.on_failure() {
                Some(delay) => {
                    warn!(
                        operation,
                        attempt = backoff.attempt(),
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(LoadError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: backoff.attempt(),
                        source: Box::new(err),
                    });
                }
            },
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            max_attempts,
            deadline: None,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::from_retries(10, 500, 30_000);
        let delays: Vec<u64> = (0..8).map(|r| policy.delay_for(r).as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn test_max_retries_excludes_first_attempt() {
        assert_eq!(RetryPolicy::from_retries(5, 500, 30_000).max_attempts, 6);
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule() {
        let mut backoff = policy(4).backoff();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.on_failure(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.on_failure(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.on_failure(), Some(Duration::from_millis(400)));
        assert_eq!(backoff.on_failure(), None);
        assert_eq!(backoff.attempt(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_retries() {
        let mut backoff = policy(100).with_deadline(Duration::from_millis(250)).backoff();
        assert_eq!(backoff.on_failure(), Some(Duration::from_millis(100)));
        tokio::time::advance(Duration::from_millis(100)).await;
        // 100ms elapsed + 200ms delay would pass the 250ms deadline
        assert_eq!(backoff.on_failure(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let value = with_retry(&policy(5), "flaky", || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(LoadError::ConnectionLost("reset".into()))
                } else {
                    Ok(call)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_wrap_last_error() {
        let calls = AtomicU32::new(0);

        let err = with_retry(&policy(3), "commit batch", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(LoadError::ConnectionLost("gone".into())) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            LoadError::RetriesExhausted { operation, attempts, source } => {
                assert_eq!(operation, "commit batch");
                assert_eq!(attempts, 3);
                assert!(matches!(*source, LoadError::ConnectionLost(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failures_are_not_retried() {
        let calls = AtomicU32::new(0);

        let err = with_retry(&policy(5), "write checkpoint", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(LoadError::CheckpointWrite("constraint".into())) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, LoadError::CheckpointWrite(_)));
    }
}
