//! Scripted publisher for tests
//!
//! Each step can be told to fail a given number of times before succeeding,
//! and `await_ready` can be scripted to need several polls or to never
//! finish. Polling goes through [`poll_until_ready`] so budgets and
//! cancellation behave like the real publishers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::poll::{poll_until_ready, PollContext, PollStatus};
use super::Publisher;
use crate::error::PublishError;
use crate::types::{
    MediaRef, PlatformKind, PublishReceipt, ReadySignal, RemoteHandle, Slot, UploadRequest,
    VideoArtifact,
};

/// How `await_ready` behaves for every attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReadiness {
    Immediate,
    /// Report ready on the n-th status check of each attempt
    ReadyAfterPolls(u32),
    /// Stay in progress until the poll budget runs out
    NeverReady,
}

/// Calls observed by a mock publisher
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub prepare: u32,
    pub submit: u32,
    pub await_ready: u32,
    pub polls: u32,
    pub finalize: u32,
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub kind: PlatformKind,
    /// Returned by every `prepare`
    pub prepare_error: Option<PublishError>,
    /// Returned by successive `submit` calls before they start succeeding
    pub submit_failures: Vec<PublishError>,
    pub readiness: MockReadiness,
    /// Returned by successive `finalize` calls before they start succeeding
    pub finalize_failures: Vec<PublishError>,
    /// Simulated latency of `submit`
    pub delay: Duration,
}

impl MockConfig {
    pub fn new(kind: PlatformKind) -> Self {
        Self {
            kind,
            prepare_error: None,
            submit_failures: Vec::new(),
            readiness: MockReadiness::Immediate,
            finalize_failures: Vec::new(),
            delay: Duration::ZERO,
        }
    }
}

pub struct MockPublisher {
    kind: PlatformKind,
    prepare_error: Option<PublishError>,
    submit_failures: Mutex<VecDeque<PublishError>>,
    readiness: MockReadiness,
    finalize_failures: Mutex<VecDeque<PublishError>>,
    delay: Duration,
    calls: Arc<Mutex<MockCalls>>,
    prepared: Arc<Mutex<Vec<UploadRequest>>>,
}

impl MockPublisher {
    pub fn new(config: MockConfig) -> Self {
        Self {
            kind: config.kind,
            prepare_error: config.prepare_error,
            submit_failures: Mutex::new(config.submit_failures.into()),
            readiness: config.readiness,
            finalize_failures: Mutex::new(config.finalize_failures.into()),
            delay: config.delay,
            calls: Arc::new(Mutex::new(MockCalls::default())),
            prepared: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Publisher that succeeds on the first attempt
    pub fn success(kind: PlatformKind) -> Self {
        Self::new(MockConfig::new(kind))
    }

    /// Publisher whose `submit` always fails with `error`
    pub fn failing(kind: PlatformKind, error: PublishError) -> Self {
        Self::new(MockConfig {
            submit_failures: vec![error; 64],
            ..MockConfig::new(kind)
        })
    }

    /// Publisher whose `submit` fails transiently `failures` times, then succeeds
    pub fn transient_then_success(kind: PlatformKind, failures: usize) -> Self {
        let errors = (1..=failures)
            .map(|n| PublishError::Transient(format!("HTTP 503 on call {}", n)))
            .collect();
        Self::new(MockConfig {
            submit_failures: errors,
            ..MockConfig::new(kind)
        })
    }

    pub fn with_readiness(kind: PlatformKind, readiness: MockReadiness) -> Self {
        Self::new(MockConfig {
            readiness,
            ..MockConfig::new(kind)
        })
    }

    /// Shared handle on the call counters, usable after the publisher moved
    pub fn calls_handle(&self) -> Arc<Mutex<MockCalls>> {
        self.calls.clone()
    }

    pub fn calls(&self) -> MockCalls {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Requests built by `prepare`, in call order
    pub fn prepared_handle(&self) -> Arc<Mutex<Vec<UploadRequest>>> {
        self.prepared.clone()
    }

    fn bump(&self, f: impl FnOnce(&mut MockCalls)) {
        if let Ok(mut calls) = self.calls.lock() {
            f(&mut calls);
        }
    }

    fn next_failure(queue: &Mutex<VecDeque<PublishError>>) -> Option<PublishError> {
        queue.lock().ok().and_then(|mut q| q.pop_front())
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn kind(&self) -> PlatformKind {
        self.kind
    }

    fn prepare(&self, artifact: &VideoArtifact, slot: &Slot) -> Result<UploadRequest, PublishError> {
        self.bump(|c| c.prepare += 1);
        if let Some(error) = &self.prepare_error {
            return Err(error.clone());
        }

        let request = UploadRequest {
            platform: self.kind,
            slot_id: slot.id.clone(),
            title: artifact.metadata.title.clone(),
            body: artifact.metadata.caption.clone(),
            category: None,
            content: slot.content,
            media: MediaRef {
                local_path: artifact.local_path.clone(),
                url: artifact.media_url.clone(),
                size_bytes: artifact.size_bytes,
            },
        };
        if let Ok(mut prepared) = self.prepared.lock() {
            prepared.push(request.clone());
        }
        Ok(request)
    }

    async fn submit(&self, request: &UploadRequest) -> Result<RemoteHandle, PublishError> {
        let attempt = {
            let mut n = 0;
            self.bump(|c| {
                c.submit += 1;
                n = c.submit;
            });
            n
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = Self::next_failure(&self.submit_failures) {
            return Err(error);
        }

        Ok(RemoteHandle {
            platform: self.kind,
            id: format!("{}-handle-{}", self.kind, attempt),
            session: None,
            needs_processing: self.readiness != MockReadiness::Immediate,
            request: request.clone(),
        })
    }

    async fn await_ready(
        &self,
        handle: &RemoteHandle,
        ctx: &PollContext,
    ) -> Result<ReadySignal, PublishError> {
        self.bump(|c| c.await_ready += 1);

        let ready_after = match self.readiness {
            MockReadiness::Immediate => return Ok(ReadySignal::Immediate),
            MockReadiness::ReadyAfterPolls(n) => Some(n),
            MockReadiness::NeverReady => None,
        };

        let mut polls = 0u32;
        let what = format!("{} {}", self.kind.short_code(), handle.id);
        poll_until_ready(ctx, &what, || {
            polls += 1;
            self.bump(|c| c.polls += 1);
            let ready = ready_after.is_some_and(|n| polls >= n);
            async move {
                if ready {
                    Ok(PollStatus::Ready)
                } else {
                    Ok(PollStatus::Pending("IN_PROGRESS".to_string()))
                }
            }
        })
        .await
    }

    async fn finalize(&self, handle: &RemoteHandle) -> Result<PublishReceipt, PublishError> {
        self.bump(|c| c.finalize += 1);
        if let Some(error) = Self::next_failure(&self.finalize_failures) {
            return Err(error);
        }

        Ok(PublishReceipt {
            platform: self.kind,
            remote_id: format!("{}-published", handle.id),
            permalink: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentType, VideoMetadata};
    use chrono::{NaiveDate, NaiveTime};
    use tokio_util::sync::CancellationToken;

    fn artifact() -> VideoArtifact {
        VideoArtifact {
            key: "reel_9am/a.mp4".to_string(),
            local_path: "/tmp/a.mp4".into(),
            media_url: Some("https://cdn/a.mp4".to_string()),
            size_bytes: 10,
            metadata: VideoMetadata {
                title: "a".to_string(),
                caption: "a | 2026-10-17".to_string(),
                date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
                duration: None,
            },
        }
    }

    fn slot() -> Slot {
        Slot::new(
            "reel_9am",
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            ContentType::Reel,
            &[PlatformKind::Instagram],
        )
    }

    #[tokio::test]
    async fn test_transient_then_success_script() {
        let mock = MockPublisher::transient_then_success(PlatformKind::Facebook, 2);
        let request = mock.prepare(&artifact(), &slot()).unwrap();

        assert!(mock.submit(&request).await.unwrap_err().is_retryable());
        assert!(mock.submit(&request).await.is_err());
        let handle = mock.submit(&request).await.unwrap();
        assert_eq!(handle.id, "facebook-handle-3");
        assert_eq!(mock.calls().submit, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_polls() {
        let mock = MockPublisher::with_readiness(PlatformKind::Instagram, MockReadiness::ReadyAfterPolls(2));
        let request = mock.prepare(&artifact(), &slot()).unwrap();
        let handle = mock.submit(&request).await.unwrap();
        assert!(handle.needs_processing);

        let ctx = PollContext {
            interval: Duration::from_secs(10),
            budget: Duration::from_secs(600),
            cancel: CancellationToken::new(),
        };
        let signal = mock.await_ready(&handle, &ctx).await.unwrap();
        assert_eq!(signal, ReadySignal::Finished { polls: 2 });
        assert_eq!(mock.calls().polls, 2);
    }

    #[test]
    fn test_prepare_error_script() {
        let mock = MockPublisher::new(MockConfig {
            prepare_error: Some(PublishError::Validation("missing {title}".to_string())),
            ..MockConfig::new(PlatformKind::YouTube)
        });
        assert!(matches!(
            mock.prepare(&artifact(), &slot()),
            Err(PublishError::Validation(_))
        ));
        assert_eq!(mock.calls().prepare, 1);
    }
}
