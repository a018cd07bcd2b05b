use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tracing::{error, warn};

use crate::{
    definition::{JobAction, JobContext},
    error::{ActionError, Result, SchedulerError},
};

/// Delay inserted between failed attempts of one execution instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failure.
    Fixed(Duration),
    /// `initial * 2^(n-1)` after the n-th failure, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay to wait after the `failed_attempt`-th attempt (1-based) failed.
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { initial, max } => {
                let factor = 1u32
                    .checked_shl(failed_attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(*max)
            }
        }
    }
}

/// How many times an execution instance may run its action before the
/// instance is recorded as `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Must be at least 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(1_000);

    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// A single attempt.
    pub fn none() -> Self {
        Self::new(1, Backoff::Fixed(Duration::ZERO))
    }

    /// Three attempts, one second apart.
    pub fn default_retries() -> Self {
        Self::new(
            Self::DEFAULT_MAX_ATTEMPTS,
            Backoff::Fixed(Self::DEFAULT_DELAY),
        )
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(SchedulerError::Validation(
                "retry policy needs at least one attempt".into(),
            ));
        }
        if let Backoff::Exponential { initial, max } = self.backoff {
            if initial > max {
                return Err(SchedulerError::Validation(
                    "exponential backoff initial delay exceeds its cap".into(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Run `action` under `policy`. Returns the last outcome and the number of
/// attempts spent. A panicking attempt counts as a failed one. Backoff waits
/// are abandoned as soon as the job is cancelled.
pub(crate) async fn run_with_retry<T>(
    action: &JobAction<T>,
    policy: &RetryPolicy,
    ctx: &JobContext,
) -> (std::result::Result<T, ActionError>, u32) {
    let mut attempt = 1;
    loop {
        let fut = action(ctx.with_attempt(attempt));
        let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(out) => out,
            Err(payload) => {
                let err = ActionError::panicked(payload);
                error!(job_id = %ctx.job_id(), run = ctx.run(), attempt, error = %err, "job action panicked");
                Err(err)
            }
        };

        let err = match outcome {
            Ok(value) => return (Ok(value), attempt),
            Err(err) if attempt >= policy.max_attempts || ctx.is_cancelled() => {
                return (Err(err), attempt)
            }
            Err(err) => err,
        };

        let wait = policy.backoff.delay_for(attempt);
        warn!(
            job_id = %ctx.job_id(),
            run = ctx.run(),
            attempt,
            wait_ms = wait.as_millis() as u64,
            error = %err,
            "job attempt failed, retrying"
        );
        tokio::select! {
            _ = ctx.cancelled() => return (Err(err), attempt),
            _ = tokio::time::sleep(wait) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::definition::JobDefinition;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn fixed_backoff_is_constant() {
        let b = Backoff::Fixed(MS * 100);
        assert_eq!(b.delay_for(1), MS * 100);
        assert_eq!(b.delay_for(7), MS * 100);
    }

    #[test]
    fn exponential_backoff_doubles_up_to_the_cap() {
        let b = Backoff::Exponential {
            initial: MS * 100,
            max: MS * 1_000,
        };
        assert_eq!(b.delay_for(1), MS * 100);
        assert_eq!(b.delay_for(2), MS * 200);
        assert_eq!(b.delay_for(3), MS * 400);
        assert_eq!(b.delay_for(4), MS * 800);
        assert_eq!(b.delay_for(5), MS * 1_000);
        // shift overflow saturates instead of wrapping
        assert_eq!(b.delay_for(64), MS * 1_000);
    }

    #[test]
    fn policy_validation() {
        assert!(RetryPolicy::none().validate().is_ok());
        assert!(RetryPolicy::default_retries().validate().is_ok());
        assert!(RetryPolicy::new(0, Backoff::Fixed(MS)).validate().is_err());
        let inverted = Backoff::Exponential {
            initial: MS * 10,
            max: MS,
        };
        assert!(RetryPolicy::new(2, inverted).validate().is_err());
    }

    fn flaky(failures: u32, calls: Arc<AtomicU32>) -> JobDefinition<String> {
        JobDefinition::builder()
            .id("retry-job")
            .retry(RetryPolicy::new(3, Backoff::Fixed(MS * 100)))
            .action(move |_ctx| {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= failures {
                        Err(ActionError::new(format!("attempt {n} failed")))
                    } else {
                        Ok("SuccessAfterRetry".to_string())
                    }
                }
            })
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let def = flaky(1, Arc::clone(&calls));
        let ctx = JobContext::new("retry-job", 1, CancellationToken::new());

        let started = tokio::time::Instant::now();
        let (out, attempts) = run_with_retry(def.action(), def.retry_policy(), &ctx).await;
        assert_eq!(out.unwrap(), "SuccessAfterRetry");
        assert_eq!(attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= MS * 100);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let def = flaky(10, Arc::clone(&calls));
        let ctx = JobContext::new("retry-job", 1, CancellationToken::new());

        let (out, attempts) = run_with_retry(def.action(), def.retry_policy(), &ctx).await;
        assert_eq!(out.unwrap_err().message(), "attempt 3 failed");
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let def = flaky(10, Arc::clone(&calls));
        let token = CancellationToken::new();
        let ctx = JobContext::new("retry-job", 1, token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(MS * 50).await;
            token.cancel();
        });
        let (out, attempts) = run_with_retry(def.action(), def.retry_policy(), &ctx).await;
        canceller.await.unwrap();
        assert!(out.is_err());
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panics_are_captured() {
        let def = JobDefinition::<u32>::builder()
            .id("panicky")
            .action(|_ctx| async {
                let missing: Option<u32> = None;
                Ok(missing.expect("exploded"))
            })
            .build()
            .unwrap();
        let ctx = JobContext::new("panicky", 1, CancellationToken::new());
        let (out, attempts) = run_with_retry(def.action(), def.retry_policy(), &ctx).await;
        assert!(out.unwrap_err().message().contains("exploded"));
        assert_eq!(attempts, 1);
    }
}
