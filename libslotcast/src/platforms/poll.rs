//! Deadline-bounded status polling

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::PollSettings;
use crate::error::PublishError;
use crate::types::ReadySignal;

/// Polling parameters for one `await_ready` call
#[derive(Debug, Clone)]
pub struct PollContext {
    pub interval: Duration,
    /// Wall-clock budget measured from the start of the call
    pub budget: Duration,
    pub cancel: CancellationToken,
}

impl PollContext {
    pub fn new(settings: PollSettings, cancel: CancellationToken) -> Self {
        Self {
            interval: settings.interval,
            budget: settings.budget,
            cancel,
        }
    }
}

/// What a single status check observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Ready,
    /// Still processing; carries the platform's status text
    Pending(String),
}

/// Check every `ctx.interval` until ready, the budget runs out, or the run
/// is cancelled
///
/// The first check happens one interval after the call. Check errors end the
/// loop unchanged.
///
/// # Errors
///
/// `PublishError::Timeout` once the budget has elapsed without a ready
/// status, `PublishError::Cancelled` when the run token fires.
pub async fn poll_until_ready<F, Fut>(
    ctx: &PollContext,
    what: &str,
    mut check: F,
) -> Result<ReadySignal, PublishError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus, PublishError>>,
{
    let deadline = Instant::now() + ctx.budget;
    let mut polls = 0u32;

    loop {
        let wake = (Instant::now() + ctx.interval).min(deadline);
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return Err(PublishError::Cancelled(format!("{} polling cancelled", what)));
            }
            _ = sleep_until(wake) => {}
        }

        polls += 1;
        let status = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return Err(PublishError::Cancelled(format!("{} polling cancelled", what)));
            }
            status = check() => status?,
        };

        match status {
            PollStatus::Ready => {
                tracing::debug!(polls, "{} ready", what);
                return Ok(ReadySignal::Finished { polls });
            }
            PollStatus::Pending(status) => {
                tracing::debug!(polls, status = %status, "{} still processing", what);
                if Instant::now() >= deadline {
                    return Err(PublishError::Timeout(format!(
                        "{} not ready after {} ({} polls, last status {})",
                        what,
                        humantime::format_duration(ctx.budget),
                        polls,
                        status
                    )));
                }
            }
        }
    }
}
