//! Retry policy, backoff schedule and the clock retries sleep on.
//!
//! Every stage carries an explicit policy: attempt cap, base delay, delay cap
//! and a per-attempt timeout. The delay before attempt `n + 1` is
//! `base * 2^(n - 1)`, raised to any server-suggested `retry-after` and capped.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::providers::ProviderError;

/// Per-stage retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1)
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Bound on a single leaf call
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Network/API stages: 3 attempts
    pub fn network() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            timeout: Duration::from_secs(30),
        }
    }

    /// Cost-bearing generation stages: 2 attempts
    pub fn generation() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Backoff after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.pow(exp))
            .min(self.max_delay)
    }
}

/// Policies for every stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePolicies {
    pub source: RetryPolicy,
    pub content: RetryPolicy,
    pub image: RetryPolicy,
    pub draft: RetryPolicy,
    pub publish: RetryPolicy,
    /// Listing comments/likers, sending replies and messages
    pub engagement_network: RetryPolicy,
    /// Generating reply and message text
    pub engagement_generation: RetryPolicy,
}

impl Default for StagePolicies {
    fn default() -> Self {
        Self {
            source: RetryPolicy::network(),
            content: RetryPolicy::generation(),
            image: RetryPolicy::generation(),
            draft: RetryPolicy::network(),
            publish: RetryPolicy::network(),
            engagement_network: RetryPolicy::network(),
            engagement_generation: RetryPolicy::generation(),
        }
    }
}

/// Source of delays between attempts
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real time
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested sleeps and returns immediately
#[derive(Debug, Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
    }
}

/// Outcome of a retried leaf call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempted<T> {
    Success { value: T, attempts: u32 },
    Failed { error: ProviderError, attempts: u32 },
}

/// Call `call` until it succeeds, fails permanently, or the attempt cap is
/// reached.
///
/// Each attempt is bounded by `policy.timeout`; an elapsed timeout counts as a
/// transient failure. `on_retry(attempt, error, delay)` runs before every
/// backoff sleep and may abort the loop by returning an error.
pub async fn retry_with<T, F, Fut, R>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    mut call: F,
    mut on_retry: R,
) -> Result<Attempted<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, ProviderError>>,
    R: FnMut(u32, &ProviderError, Duration) -> Result<()>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(policy.timeout, call(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(policy.timeout)),
        };

        let error = match result {
            Ok(value) => {
                return Ok(Attempted::Success {
                    value,
                    attempts: attempt,
                });
            }
            Err(error) => error,
        };

        if !error.is_retryable() || attempt >= max_attempts {
            return Ok(Attempted::Failed {
                error,
                attempts: attempt,
            });
        }

        let delay = error
            .retry_after()
            .map_or(policy.delay_for(attempt), |wait| wait.max(policy.delay_for(attempt)))
            .min(policy.max_delay);

        tracing::warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient provider failure, backing off"
        );

        on_retry(attempt, &error, delay)?;
        clock.sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkflowError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = fast();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
        assert_eq!(policy.delay_for(40), Duration::from_millis(300));
    }

    #[test]
    fn test_default_stage_caps() {
        let policies = StagePolicies::default();
        assert_eq!(policies.source.max_attempts, 3);
        assert_eq!(policies.publish.max_attempts, 3);
        assert_eq!(policies.content.max_attempts, 2);
        assert_eq!(policies.image.max_attempts, 2);
        assert_eq!(RetryPolicy::network().with_max_attempts(0).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_within_cap() {
        let clock = RecordingClock::new();
        let calls = &AtomicU32::new(0);
        let mut retries = Vec::new();

        let outcome = retry_with(
            &fast(),
            &clock,
            move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Network("reset".into()))
                } else {
                    Ok("done")
                }
            },
            |attempt, _, delay| {
                retries.push((attempt, delay));
                Ok(())
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome, Attempted::Success { value: "done", attempts: 3 });
        assert_eq!(
            retries,
            vec![(1, Duration::from_millis(100)), (2, Duration::from_millis(200))]
        );
        assert_eq!(clock.total(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent() {
        let clock = RecordingClock::new();
        let outcome: Attempted<()> = retry_with(
            &fast(),
            &clock,
            |_| async { Err(ProviderError::SourceNotFound("note".into())) },
            |_, _, _| Ok(()),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, Attempted::Failed { attempts: 1, .. }));
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_retry_exhausts_cap() {
        let clock = RecordingClock::new();
        let outcome: Attempted<()> = retry_with(
            &fast(),
            &clock,
            |_| async { Err(ProviderError::GenerationTransient("overloaded".into())) },
            |_, _, _| Ok(()),
        )
        .await
        .unwrap();

        match outcome {
            Attempted::Failed { error, attempts } => {
                assert_eq!(attempts, 3);
                assert!(error.is_retryable());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let clock = RecordingClock::new();
        let policy = fast().with_max_attempts(2);
        let outcome: Attempted<()> = retry_with(
            &policy,
            &clock,
            |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            |_, err, _| {
                assert!(matches!(err, ProviderError::Timeout(_)));
                Ok(())
            },
        )
        .await
        .unwrap();

        assert!(matches!(
            outcome,
            Attempted::Failed {
                error: ProviderError::Timeout(_),
                attempts: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_retry_after_raises_delay() {
        let clock = RecordingClock::new();
        let calls = &AtomicU32::new(0);
        let _ = retry_with(
            &fast(),
            &clock,
            move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ProviderError::RateLimited {
                        retry_after: Some(Duration::from_millis(250)),
                    })
                } else {
                    Ok(())
                }
            },
            |_, _, _| Ok(()),
        )
        .await
        .unwrap();
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(250)]);
    }

    #[tokio::test]
    async fn test_on_retry_can_abort() {
        let clock = RecordingClock::new();
        let result: Result<Attempted<()>> = retry_with(
            &fast(),
            &clock,
            |_| async { Err(ProviderError::Network("reset".into())) },
            |_, _, _| Err(WorkflowError::Cancelled("run-1".into())),
        )
        .await;
        assert!(matches!(result, Err(WorkflowError::Cancelled(_))));
        assert!(clock.sleeps().is_empty());
    }
}
