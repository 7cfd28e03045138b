//! Bounded retry with exponential backoff
//!
//! One retry attempt runs the whole publish cycle. Transient failures and
//! readiness timeouts start a fresh attempt after a backoff; everything else
//! ends the (slot, platform) pair right away.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RetrySettings;
use crate::error::PublishError;
use crate::types::{PlatformKind, PublishAttempt, PublishState};

/// Failure of one attempt, with the furthest state it reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptError {
    pub error: PublishError,
    pub reached: PublishState,
}

impl AttemptError {
    pub fn at(reached: PublishState, error: PublishError) -> Self {
        Self { error, reached }
    }
}

impl From<PublishError> for AttemptError {
    fn from(error: PublishError) -> Self {
        Self::at(PublishState::Prepared, error)
    }
}

/// Furthest state the running attempt has reached
///
/// Cloned into each attempt so the state survives when cancellation drops
/// the attempt future.
#[derive(Debug, Clone)]
pub struct AttemptProgress(Arc<Mutex<PublishState>>);

impl AttemptProgress {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(PublishState::Prepared)))
    }

    pub fn advance(&self, state: PublishState) {
        match self.0.lock() {
            Ok(mut reached) => *reached = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }

    pub fn reached(&self) -> PublishState {
        match self.0.lock() {
            Ok(reached) => *reached,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Tag `error` with the furthest state reached so far
    pub fn fail(&self, error: PublishError) -> AttemptError {
        AttemptError::at(self.reached(), error)
    }
}

/// Delay before retry `n` (1-based): `initial * multiplier^(n-1)`, capped
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffSchedule {
    pub initial: Duration,
    pub multiplier: u32,
    pub max: Duration,
    /// Add up to 10% random delay on top of the computed value
    pub jitter: bool,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2,
            max: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl BackoffSchedule {
    /// Deterministic delay before retry `retry` (jitter not applied)
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let factor = self.multiplier.max(1).checked_pow(exponent).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    fn jittered(&self, retry: u32) -> Duration {
        let base = self.delay(retry);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..=0.1);
        base + base.mul_f64(extra)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`
    pub max_retries: u32,
    pub backoff: BackoffSchedule,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffSchedule::default(),
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            backoff: BackoffSchedule {
                initial: settings.initial_backoff,
                multiplier: settings.multiplier,
                max: settings.max_backoff,
                jitter: settings.jitter,
            },
        }
    }
}

impl RetryPolicy {
    /// Run `attempt_fn` until it succeeds, fails with a non-retryable error,
    /// or runs out of retries
    ///
    /// Every attempt that started is appended to `history`. Cancellation
    /// interrupts both a running attempt and a backoff wait; an interrupted
    /// attempt is recorded at the state it last reported through its
    /// [`AttemptProgress`].
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, the last error once retries are
    /// exhausted, or `PublishError::Cancelled`.
    pub async fn execute<T, F, Fut>(
        &self,
        platform: PlatformKind,
        slot_id: &str,
        history: &mut Vec<PublishAttempt>,
        cancel: &CancellationToken,
        mut attempt_fn: F,
    ) -> Result<T, PublishError>
    where
        F: FnMut(u32, AttemptProgress) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let max_attempts = self.max_retries.saturating_add(1);
        let mut attempt = 1u32;

        loop {
            if cancel.is_cancelled() {
                return Err(PublishError::Cancelled(format!(
                    "run cancelled before attempt {}",
                    attempt
                )));
            }

            let started_at = Utc::now();
            let progress = AttemptProgress::new();
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(progress.fail(PublishError::Cancelled(format!(
                    "run cancelled during attempt {}",
                    attempt
                )))),
                result = attempt_fn(attempt, progress.clone()) => result,
            };
            let finished_at = Utc::now();

            let failure = match result {
                Ok(value) => {
                    history.push(PublishAttempt {
                        platform,
                        slot_id: slot_id.to_string(),
                        attempt,
                        state: PublishState::Published,
                        reached: PublishState::Published,
                        started_at,
                        finished_at,
                        error: None,
                    });
                    if attempt > 1 {
                        info!(slot = slot_id, platform = %platform, attempt, "Published after retry");
                    }
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            history.push(PublishAttempt {
                platform,
                slot_id: slot_id.to_string(),
                attempt,
                state: PublishState::Errored,
                reached: failure.reached,
                started_at,
                finished_at,
                error: Some(failure.error.to_string()),
            });

            let error = failure.error;
            if !error.is_retryable() {
                warn!(
                    slot = slot_id,
                    platform = %platform,
                    attempt,
                    reached = %failure.reached,
                    error = %error,
                    "Attempt failed, not retrying"
                );
                return Err(error);
            }
            if attempt >= max_attempts {
                warn!(
                    slot = slot_id,
                    platform = %platform,
                    attempts = attempt,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(error);
            }

            let delay = self.backoff.jittered(attempt);
            warn!(
                slot = slot_id,
                platform = %platform,
                attempt,
                max_attempts,
                backoff_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(PublishError::Cancelled(format!(
                        "run cancelled during backoff after attempt {} ({})",
                        attempt, error
                    )));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: BackoffSchedule::default(),
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let schedule = BackoffSchedule::default();
        assert_eq!(schedule.delay(1), Duration::from_secs(1));
        assert_eq!(schedule.delay(2), Duration::from_secs(2));
        assert_eq!(schedule.delay(3), Duration::from_secs(4));
        assert_eq!(schedule.delay(5), Duration::from_secs(16));
        assert_eq!(schedule.delay(6), Duration::from_secs(30));
        assert_eq!(schedule.delay(40), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let schedule = BackoffSchedule {
            jitter: true,
            ..BackoffSchedule::default()
        };
        for _ in 0..100 {
            let d = schedule.jittered(3);
            assert!(d >= Duration::from_secs(4));
            assert!(d <= Duration::from_millis(4400));
        }
    }

    #[test]
    fn test_policy_from_settings() {
        let settings = RetrySettings {
            max_retries: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            multiplier: 3,
            jitter: true,
        };
        let policy = RetryPolicy::from(&settings);
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.backoff.delay(3), Duration::from_millis(4500));
        assert_eq!(policy.backoff.delay(4), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut history = Vec::new();
        let start = Instant::now();

        let result = policy(3)
            .execute(PlatformKind::YouTube, "reel_9am", &mut history, &CancellationToken::new(), |_, _| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n <= 3 {
                        Err(AttemptError::at(
                            PublishState::Submitted,
                            PublishError::Transient("HTTP 503".to_string()),
                        ))
                    } else {
                        Ok("video-id")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "video-id");
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].state, PublishState::Errored);
        assert_eq!(history[0].reached, PublishState::Submitted);
        assert_eq!(history[3].state, PublishState::Published);
        assert_eq!(
            history.iter().map(|a| a.attempt).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        // 1s + 2s + 4s of backoff
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let mut history = Vec::new();
        let result: Result<(), _> = policy(3)
            .execute(PlatformKind::Instagram, "reel_9am", &mut history, &CancellationToken::new(), |_, _| async {
                Err(PublishError::Permanent("HTTP 401".to_string()).into())
            })
            .await;

        assert_eq!(result.unwrap_err(), PublishError::Permanent("HTTP 401".to_string()));
        assert_eq!(history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_error_is_not_retried() {
        let mut history = Vec::new();
        let result: Result<(), _> = policy(3)
            .execute(PlatformKind::X, "reel_4pm", &mut history, &CancellationToken::new(), |_, _| async {
                Err(PublishError::Validation("post text is 300 characters".to_string()).into())
            })
            .await;

        assert!(matches!(result, Err(PublishError::Validation(_))));
        assert_eq!(history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let mut history = Vec::new();
        let result: Result<(), _> = policy(3)
            .execute(PlatformKind::Instagram, "std_4_30pm", &mut history, &CancellationToken::new(), |n, _| async move {
                Err(AttemptError::at(
                    PublishState::Polling,
                    PublishError::Timeout(format!("not ready on attempt {}", n)),
                ))
            })
            .await;

        assert_eq!(
            result.unwrap_err(),
            PublishError::Timeout("not ready on attempt 4".to_string())
        );
        assert_eq!(history.len(), 4);
        assert!(history.iter().all(|a| a.reached == PublishState::Polling));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_means_single_attempt() {
        let mut history = Vec::new();
        let result: Result<(), _> = policy(0)
            .execute(PlatformKind::Facebook, "std_9_30am", &mut history, &CancellationToken::new(), |_, _| async {
                Err(PublishError::Transient("reset".to_string()).into())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let mut history = Vec::new();
        let result: Result<(), _> = policy(3)
            .execute(PlatformKind::YouTube, "reel_9am", &mut history, &cancel, |_, _| async {
                Err(PublishError::Transient("HTTP 502".to_string()).into())
            })
            .await;

        assert!(matches!(result, Err(PublishError::Cancelled(_))));
        assert_eq!(history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_attempt_keeps_reached_state() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let mut history = Vec::new();
        let result: Result<(), _> = policy(3)
            .execute(PlatformKind::Instagram, "reel_9am", &mut history, &cancel, |_, progress| async move {
                progress.advance(PublishState::Submitted);
                progress.advance(PublishState::Polling);
                std::future::pending::<Result<(), AttemptError>>().await
            })
            .await;

        assert!(matches!(result, Err(PublishError::Cancelled(_))));
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reached, PublishState::Polling);
        assert!(history[0].error.as_deref().unwrap().contains("during attempt 1"));
    }

    #[test]
    fn test_progress_fail_uses_latest_state() {
        let progress = AttemptProgress::new();
        assert_eq!(progress.fail(PublishError::Transient("reset".to_string())).reached, PublishState::Prepared);
        progress.clone().advance(PublishState::Pending);
        assert_eq!(progress.reached(), PublishState::Pending);
    }
}
