//! TikTok via the Content Posting API direct-post flow
//!
//! `submit` checks the creator's allowed privacy levels, initializes the post
//! to obtain a `publish_id` and an upload URL, then PUTs the file in one or
//! more byte ranges. TikTok publishes on its own once processing is done, so
//! `await_ready` polls the publish status and `finalize` only collects the
//! public post id.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::http::{check_response, json_response, transport_error};
use super::poll::{poll_until_ready, PollContext, PollStatus};
use super::{read_range, truncate_chars, Publisher};
use crate::config::TikTokConfig;
use crate::error::PublishError;
use crate::template::{self, TemplateVars};
use crate::types::{
    MediaRef, PlatformKind, PublishReceipt, ReadySignal, RemoteHandle, Slot, UploadRequest,
    VideoArtifact,
};

pub const CAPTION_LIMIT: usize = 150;
pub const VIDEO_SIZE_LIMIT: u64 = 4 * 1024 * 1024 * 1024;

// Error codes TikTok documents as worth retrying
const TRANSIENT_CODES: [&str; 2] = ["rate_limit_exceeded", "internal_error"];

pub struct TikTokPublisher {
    client: Client,
    api_url: String,
    token: SecretString,
    caption_template: String,
    privacy_level: String,
    chunk_size: u64,
    upload_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct CreatorInfo {
    #[serde(default)]
    privacy_level_options: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct InitData {
    publish_id: String,
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    status: String,
    #[serde(default)]
    fail_reason: Option<String>,
    // Field name as spelled by the API
    #[serde(default, rename = "publicaly_available_post_id")]
    post_ids: Vec<Value>,
}

/// `(chunk_size, chunk_count)` for an upload of `total` bytes
///
/// Every chunk is `chunk_size` long except the last, which takes the
/// remainder. Files no larger than one chunk go up whole.
fn chunk_plan(total: u64, chunk_size: u64) -> (u64, u64) {
    if total <= chunk_size {
        return (total, 1);
    }
    (chunk_size, total / chunk_size)
}

impl TikTokPublisher {
    pub fn new(
        client: Client,
        config: &TikTokConfig,
        token: SecretString,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            caption_template: config.caption_template.clone(),
            privacy_level: config.privacy_level.clone(),
            chunk_size: config.chunk_size.max(1) as u64,
            upload_timeout,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        context: &str,
        endpoint: &str,
        body: &Value,
    ) -> Result<T, PublishError> {
        let response = self
            .client
            .post(format!("{}/{}", self.api_url, endpoint))
            .bearer_auth(self.token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::TikTok, context, e))?;

        let envelope: Envelope<T> = json_response(PlatformKind::TikTok, context, response).await?;
        if envelope.error.code != "ok" {
            let message = format!(
                "{} {}: {}: {}",
                PlatformKind::TikTok,
                context,
                envelope.error.code,
                envelope.error.message
            );
            return Err(if TRANSIENT_CODES.contains(&envelope.error.code.as_str()) {
                PublishError::Transient(message)
            } else {
                PublishError::Permanent(message)
            });
        }
        envelope
            .data
            .ok_or_else(|| {
                PublishError::Permanent(format!("{} {}: response had no data", PlatformKind::TikTok, context))
            })
    }

    async fn fetch_status(&self, publish_id: &str) -> Result<StatusData, PublishError> {
        self.call("publish status", "post/publish/status/fetch/", &json!({ "publish_id": publish_id }))
            .await
    }

    async fn status(&self, publish_id: &str) -> Result<PollStatus, PublishError> {
        let status = self.fetch_status(publish_id).await?;
        classify(publish_id, &status)
    }

    async fn upload(
        &self,
        upload_url: &str,
        request: &UploadRequest,
        chunk_size: u64,
        count: u64,
    ) -> Result<(), PublishError> {
        let total = request.media.size_bytes;
        if total == 0 {
            return Err(PublishError::Validation("cannot upload an empty file".to_string()));
        }

        for index in 0..count {
            let start = index * chunk_size;
            let len = if index + 1 == count { total - start } else { chunk_size };
            let chunk = read_range(&request.media.local_path, start, len).await?;
            if chunk.len() as u64 != len {
                return Err(PublishError::Permanent(format!(
                    "{} is shorter than its recorded size",
                    request.media.local_path.display()
                )));
            }

            let response = self
                .client
                .put(upload_url)
                .header(CONTENT_TYPE, "video/mp4")
                .header(CONTENT_LENGTH, len)
                .header(CONTENT_RANGE, format!("bytes {}-{}/{}", start, start + len - 1, total))
                .body(chunk)
                .timeout(self.upload_timeout)
                .send()
                .await
                .map_err(|e| transport_error(PlatformKind::TikTok, "upload chunk", e))?;
            check_response(PlatformKind::TikTok, "upload chunk", response).await?;
        }

        Ok(())
    }
}

fn classify(publish_id: &str, status: &StatusData) -> Result<PollStatus, PublishError> {
    match status.status.as_str() {
        "PUBLISH_COMPLETE" | "SEND_TO_USER_INBOX" => Ok(PollStatus::Ready),
        "FAILED" => Err(PublishError::Permanent(format!(
            "publish {} failed: {}",
            publish_id,
            status.fail_reason.as_deref().unwrap_or("no reason given")
        ))),
        other => Ok(PollStatus::Pending(other.to_string())),
    }
}

#[async_trait]
impl Publisher for TikTokPublisher {
    fn kind(&self) -> PlatformKind {
        PlatformKind::TikTok
    }

    fn prepare(&self, artifact: &VideoArtifact, slot: &Slot) -> Result<UploadRequest, PublishError> {
        if artifact.size_bytes == 0 || artifact.size_bytes > VIDEO_SIZE_LIMIT {
            return Err(PublishError::Validation(format!(
                "{} is {} bytes, TikTok accepts 1 to {} bytes",
                artifact.key, artifact.size_bytes, VIDEO_SIZE_LIMIT
            )));
        }

        let vars = TemplateVars::new(artifact, slot, PlatformKind::TikTok);
        let caption = truncate_chars(template::render(&self.caption_template, &vars)?.trim(), CAPTION_LIMIT);

        Ok(UploadRequest {
            platform: PlatformKind::TikTok,
            slot_id: slot.id.clone(),
            title: caption.clone(),
            body: caption,
            category: None,
            content: slot.content,
            media: MediaRef {
                local_path: artifact.local_path.clone(),
                url: artifact.media_url.clone(),
                size_bytes: artifact.size_bytes,
            },
        })
    }

    async fn submit(&self, request: &UploadRequest) -> Result<RemoteHandle, PublishError> {
        let creator: CreatorInfo = self
            .call("creator info", "post/publish/creator_info/query/", &json!({}))
            .await?;
        if !creator.privacy_level_options.is_empty()
            && !creator.privacy_level_options.contains(&self.privacy_level)
        {
            return Err(PublishError::Validation(format!(
                "privacy level {} is not allowed for this creator (allowed: {})",
                self.privacy_level,
                creator.privacy_level_options.join(", ")
            )));
        }

        let total = request.media.size_bytes;
        let (chunk_size, chunk_count) = chunk_plan(total, self.chunk_size);
        let init: InitData = self
            .call(
                "init post",
                "post/publish/video/init/",
                &json!({
                    "post_info": {
                        "title": request.body,
                        "privacy_level": self.privacy_level,
                        "disable_duet": false,
                        "disable_comment": false,
                        "disable_stitch": false,
                        "video_cover_timestamp_ms": 1000,
                    },
                    "source_info": {
                        "source": "FILE_UPLOAD",
                        "video_size": total,
                        "chunk_size": chunk_size,
                        "total_chunk_count": chunk_count,
                    },
                }),
            )
            .await?;

        self.upload(&init.upload_url, request, chunk_size, chunk_count).await?;
        tracing::info!(
            slot = %request.slot_id,
            publish_id = %init.publish_id,
            chunks = chunk_count,
            "TikTok video uploaded"
        );

        Ok(RemoteHandle {
            platform: PlatformKind::TikTok,
            id: init.publish_id,
            session: Some(init.upload_url),
            needs_processing: true,
            request: request.clone(),
        })
    }

    async fn await_ready(
        &self,
        handle: &RemoteHandle,
        ctx: &PollContext,
    ) -> Result<ReadySignal, PublishError> {
        let publish_id = handle.id.as_str();
        poll_until_ready(ctx, "TikTok post", || self.status(publish_id)).await
    }

    async fn finalize(&self, handle: &RemoteHandle) -> Result<PublishReceipt, PublishError> {
        let status = self.fetch_status(&handle.id).await?;
        if let PollStatus::Pending(state) = classify(&handle.id, &status)? {
            return Err(PublishError::Transient(format!(
                "publish {} is still {}",
                handle.id, state
            )));
        }

        let remote_id = status
            .post_ids
            .first()
            .map(|id| match id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| handle.id.clone());

        Ok(PublishReceipt {
            platform: PlatformKind::TikTok,
            permalink: None,
            remote_id,
        })
    }
}
