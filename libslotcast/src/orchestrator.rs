//! Run orchestration
//!
//! Slots run one after another in the order given. Within a slot the source
//! is resolved once and every enabled platform publishes concurrently, each
//! with its own retry loop and attempt history. A failing platform never
//! affects its siblings.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, PollSettings};
use crate::platforms::{PollContext, Publisher};
use crate::retry::{AttemptError, AttemptProgress, RetryPolicy};
use crate::source::{Resolution, SourceResolver};
use crate::summary::RunSummary;
use crate::types::{
    PlatformKind, PublishAttempt, PublishReceipt, PublishState, ReadySignal, Slot, SlotOutcome,
    VideoArtifact,
};

pub const NO_VIDEO: &str = "no video";
pub const SOURCE_ERROR: &str = "source error";

/// Retry and polling parameters for one platform
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlatformPolicy {
    pub retry: RetryPolicy,
    pub poll: PollSettings,
}

impl PlatformPolicy {
    /// Effective policies for every platform, global values with per-platform overrides
    pub fn from_config(config: &Config) -> HashMap<PlatformKind, PlatformPolicy> {
        PlatformKind::ALL
            .into_iter()
            .map(|platform| {
                let policy = PlatformPolicy {
                    retry: RetryPolicy::from(&config.retry_settings_for(platform)),
                    poll: config.poll_settings_for(platform),
                };
                (platform, policy)
            })
            .collect()
    }
}

/// Summary plus every attempt made during the run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub attempts: Vec<PublishAttempt>,
}

pub struct Orchestrator {
    publishers: HashMap<PlatformKind, Arc<dyn Publisher>>,
    resolver: Arc<dyn SourceResolver>,
    policies: HashMap<PlatformKind, PlatformPolicy>,
    fallback: PlatformPolicy,
}

impl Orchestrator {
    /// `publishers` holds the globally enabled platforms; a slot's platforms
    /// missing from it are skipped without an outcome.
    pub fn new(
        publishers: HashMap<PlatformKind, Arc<dyn Publisher>>,
        resolver: Arc<dyn SourceResolver>,
        policies: HashMap<PlatformKind, PlatformPolicy>,
    ) -> Self {
        Self {
            publishers,
            resolver,
            policies,
            fallback: PlatformPolicy::default(),
        }
    }

    fn policy(&self, platform: PlatformKind) -> &PlatformPolicy {
        self.policies.get(&platform).unwrap_or(&self.fallback)
    }

    /// Enabled platforms of a slot, in the slot's declaration order
    fn enabled_targets(&self, slot: &Slot) -> Vec<PlatformKind> {
        slot.platforms
            .iter()
            .copied()
            .filter(|platform| {
                let enabled = self.publishers.contains_key(platform);
                if !enabled {
                    info!(slot = %slot.id, platform = %platform, "Platform disabled globally, skipping");
                }
                enabled
            })
            .collect()
    }

    pub async fn run(&self, slots: &[Slot], cancel: &CancellationToken) -> RunReport {
        let mut report = RunReport::default();

        for slot in slots {
            let targets = self.enabled_targets(slot);
            if targets.is_empty() {
                warn!(slot = %slot.id, "No enabled platforms for slot");
                continue;
            }

            info!(slot = %slot.id, platforms = targets.len(), "Processing slot");
            self.run_slot(slot, &targets, cancel, &mut report).await;
        }

        let counts = report.summary.counts();
        info!(
            success = counts.success,
            skipped = counts.skipped,
            failed = counts.failed,
            attempts = report.attempts.len(),
            "Run complete"
        );
        report
    }

    async fn run_slot(
        &self,
        slot: &Slot,
        targets: &[PlatformKind],
        cancel: &CancellationToken,
        report: &mut RunReport,
    ) {
        if cancel.is_cancelled() {
            for &platform in targets {
                report.summary.record(SlotOutcome::failed(
                    &slot.id,
                    platform,
                    format!("{} cancelled", platform.short_code()),
                    Some("run cancelled before the slot started".to_string()),
                    0,
                ));
            }
            return;
        }

        let artifact = match self.resolver.resolve(slot).await {
            Ok(Resolution::Found(artifact)) => Arc::new(artifact),
            Ok(Resolution::Absent { reason }) => {
                info!(slot = %slot.id, reason = %reason, "No video for slot");
                for &platform in targets {
                    let mut outcome = SlotOutcome::skipped(&slot.id, platform, NO_VIDEO);
                    outcome.detail = Some(reason.clone());
                    report.summary.record(outcome);
                }
                return;
            }
            Err(e) => {
                error!(slot = %slot.id, error = %e, "Source resolution failed");
                for &platform in targets {
                    report.summary.record(SlotOutcome::failed(
                        &slot.id,
                        platform,
                        SOURCE_ERROR.to_string(),
                        Some(e.to_string()),
                        0,
                    ));
                }
                return;
            }
        };

        info!(slot = %slot.id, key = %artifact.key, "Resolved video");

        let tasks = targets
            .iter()
            .map(|&platform| self.publish_one(slot, platform, artifact.clone(), cancel));

        for (outcome, attempts) in join_all(tasks).await {
            report.summary.record(outcome);
            report.attempts.extend(attempts);
        }
    }

    async fn publish_one(
        &self,
        slot: &Slot,
        platform: PlatformKind,
        artifact: Arc<VideoArtifact>,
        cancel: &CancellationToken,
    ) -> (SlotOutcome, Vec<PublishAttempt>) {
        let mut history = Vec::new();

        let Some(publisher) = self.publishers.get(&platform) else {
            let outcome = SlotOutcome::failed(
                &slot.id,
                platform,
                format!("{} unavailable", platform.short_code()),
                None,
                0,
            );
            return (outcome, history);
        };

        let policy = self.policy(platform);
        let ctx = PollContext::new(policy.poll, cancel.clone());

        let publisher: &dyn Publisher = publisher.as_ref();
        let artifact: &VideoArtifact = &artifact;
        let ctx = &ctx;

        let result = policy
            .retry
            .execute(platform, &slot.id, &mut history, cancel, move |_attempt, progress| {
                publish_cycle(publisher, artifact, slot, ctx, progress)
            })
            .await;

        let attempts = history.len() as u32;
        let outcome = match result {
            Ok(receipt) => {
                info!(
                    slot = %slot.id,
                    platform = %platform,
                    attempts,
                    remote_id = %receipt.remote_id,
                    "Published"
                );
                SlotOutcome::success(&slot.id, receipt, attempts)
            }
            Err(e) => {
                error!(slot = %slot.id, platform = %platform, attempts, error = %e, "Publish failed");
                SlotOutcome::failed(
                    &slot.id,
                    platform,
                    format!("{} {}", platform.short_code(), e.label()),
                    Some(e.detail().to_string()),
                    attempts,
                )
            }
        };

        (outcome, history)
    }
}

/// One pass through prepare, submit, await_ready and finalize
async fn publish_cycle(
    publisher: &dyn Publisher,
    artifact: &VideoArtifact,
    slot: &Slot,
    ctx: &PollContext,
    progress: AttemptProgress,
) -> Result<PublishReceipt, AttemptError> {
    let request = publisher.prepare(artifact, slot).map_err(|e| progress.fail(e))?;

    let handle = publisher
        .submit(&request)
        .await
        .map_err(|e| progress.fail(e))?;

    progress.advance(if handle.needs_processing {
        PublishState::Polling
    } else {
        PublishState::Submitted
    });
    let ready = publisher
        .await_ready(&handle, ctx)
        .await
        .map_err(|e| progress.fail(e))?;
    if let ReadySignal::Finished { polls } = ready {
        tracing::debug!(slot = %slot.id, platform = %handle.platform, polls, "Remote processing finished");
    }

    progress.advance(PublishState::Pending);
    publisher.finalize(&handle).await.map_err(|e| progress.fail(e))
}
