//! Platform publishers
//!
//! Every platform is driven through the same four steps:
//!
//! ```text
//! prepare -> submit -> await_ready -> finalize
//! ```
//!
//! `prepare` is pure and turns the slot's video into a platform payload.
//! `submit` uploads or registers the media and returns a [`RemoteHandle`].
//! `await_ready` waits for asynchronous processing (Instagram containers,
//! X media, TikTok posts) and `finalize` makes the post public.
//!
//! A failure at any step ends the attempt; [`crate::retry::RetryPolicy`]
//! decides whether a fresh attempt starts from `prepare` again.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Config, PlatformStatus};
use crate::error::{ConfigError, PublishError};
use crate::types::{
    PlatformKind, PublishReceipt, ReadySignal, RemoteHandle, Slot, UploadRequest, VideoArtifact,
};

pub mod facebook;
pub mod http;
pub mod instagram;
pub mod poll;
pub mod tiktok;
pub mod x;
pub mod youtube;

// Available outside tests so integration tests can script publishers
pub mod mock;

pub use poll::PollContext;

#[async_trait]
pub trait Publisher: Send + Sync {
    fn kind(&self) -> PlatformKind;

    /// Build the platform payload for a slot's video
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Validation` when a template cannot be rendered
    /// or the payload violates a platform constraint.
    fn prepare(&self, artifact: &VideoArtifact, slot: &Slot) -> Result<UploadRequest, PublishError>;

    /// Upload or register the media
    async fn submit(&self, request: &UploadRequest) -> Result<RemoteHandle, PublishError>;

    /// Wait until the platform finished processing the submitted media
    ///
    /// Platforms without asynchronous processing are ready immediately.
    async fn await_ready(
        &self,
        _handle: &RemoteHandle,
        _ctx: &PollContext,
    ) -> Result<ReadySignal, PublishError> {
        Ok(ReadySignal::Immediate)
    }

    /// Publish the processed media
    async fn finalize(&self, handle: &RemoteHandle) -> Result<PublishReceipt, PublishError>;
}

/// Truncate to at most `max` characters (not bytes)
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Read `len` bytes of the video starting at `offset`
///
/// Returns fewer bytes only at end of file.
pub(crate) async fn read_range(
    path: &std::path::Path,
    offset: u64,
    len: u64,
) -> Result<Vec<u8>, PublishError> {
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    let io_err = |e: std::io::Error| {
        PublishError::Permanent(format!("cannot read {}: {}", path.display(), e))
    };

    let mut file = tokio::fs::File::open(path).await.map_err(io_err)?;
    file.seek(std::io::SeekFrom::Start(offset)).await.map_err(io_err)?;

    let mut buf = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
    file.take(len).read_to_end(&mut buf).await.map_err(io_err)?;
    Ok(buf)
}

/// Build a publisher for every platform that is configured, enabled and
/// has its token available
///
/// Platforms left out are logged with the reason.
///
/// # Errors
///
/// Returns `ConfigError` when an HTTP client cannot be constructed.
pub fn build_publishers(
    config: &Config,
) -> Result<HashMap<PlatformKind, Arc<dyn Publisher>>, ConfigError> {
    let client = http::build_client(&config.http)?;
    let mut publishers: HashMap<PlatformKind, Arc<dyn Publisher>> = HashMap::new();

    for platform in PlatformKind::ALL {
        match config.platform_status(platform) {
            PlatformStatus::Enabled => {}
            PlatformStatus::Disabled => {
                tracing::debug!(platform = %platform, "Platform disabled in configuration");
                continue;
            }
            PlatformStatus::MissingToken(var) => {
                tracing::warn!(
                    platform = %platform,
                    token_env = %var,
                    "Platform disabled: access token variable is not set"
                );
                continue;
            }
        }

        let Some(token) = config.token_for(platform) else {
            continue;
        };

        let publisher: Arc<dyn Publisher> = match platform {
            PlatformKind::Instagram => match &config.instagram {
                Some(ig) => Arc::new(instagram::InstagramPublisher::new(client.clone(), ig, token)),
                None => continue,
            },
            PlatformKind::Facebook => match &config.facebook {
                Some(fb) => Arc::new(facebook::FacebookPublisher::new(
                    client.clone(),
                    fb,
                    token,
                    config.http.upload_timeout,
                )),
                None => continue,
            },
            PlatformKind::YouTube => match &config.youtube {
                Some(yt) => Arc::new(youtube::YouTubePublisher::new(
                    client.clone(),
                    yt,
                    token,
                    config.http.upload_timeout,
                )),
                None => continue,
            },
            PlatformKind::X => match &config.x {
                Some(x) => Arc::new(x::XPublisher::new(
                    client.clone(),
                    x,
                    token,
                    config.http.upload_timeout,
                )),
                None => continue,
            },
            PlatformKind::TikTok => match &config.tiktok {
                Some(tt) => Arc::new(tiktok::TikTokPublisher::new(
                    client.clone(),
                    tt,
                    token,
                    config.http.upload_timeout,
                )),
                None => continue,
            },
        };

        tracing::info!(platform = %platform, "Platform enabled");
        publishers.insert(platform, publisher);
    }

    Ok(publishers)
}
