//! YouTube via the Data API v3 resumable upload
//!
//! `submit` opens a resumable session with the video metadata and keeps the
//! session URI from the `Location` header. `finalize` streams the file to
//! that URI, which creates the video.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use super::http::{check_response, json_response, transport_error};
use super::{truncate_chars, Publisher};
use crate::config::YouTubeConfig;
use crate::error::PublishError;
use crate::template::{self, TemplateVars};
use crate::types::{
    ContentType, MediaRef, PlatformKind, PublishReceipt, RemoteHandle, Slot, UploadRequest,
    VideoArtifact,
};

pub const TITLE_LIMIT: usize = 100;
pub const DESCRIPTION_LIMIT: usize = 5000;
const SHORTS_TAG: &str = "#Shorts";

pub struct YouTubePublisher {
    client: Client,
    upload_url: String,
    token: SecretString,
    title_template: String,
    description_template: String,
    category_id: String,
    privacy_status: String,
    upload_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct VideoResource {
    id: String,
}

impl YouTubePublisher {
    pub fn new(
        client: Client,
        config: &YouTubeConfig,
        token: SecretString,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            client,
            upload_url: config.upload_url.trim_end_matches('/').to_string(),
            token,
            title_template: config.title_template.clone(),
            description_template: config.description_template.clone(),
            category_id: config.category_id.clone(),
            privacy_status: config.privacy_status.clone(),
            upload_timeout,
        }
    }
}

#[async_trait]
impl Publisher for YouTubePublisher {
    fn kind(&self) -> PlatformKind {
        PlatformKind::YouTube
    }

    fn prepare(&self, artifact: &VideoArtifact, slot: &Slot) -> Result<UploadRequest, PublishError> {
        let vars = TemplateVars::new(artifact, slot, PlatformKind::YouTube);

        let title = truncate_chars(template::render(&self.title_template, &vars)?.trim(), TITLE_LIMIT);
        if title.is_empty() {
            return Err(PublishError::Validation("YouTube title is empty".to_string()));
        }

        let mut description = template::render(&self.description_template, &vars)?;
        if slot.content == ContentType::Reel && !description.to_lowercase().contains("#shorts") {
            description.push_str("\n\n");
            description.push_str(SHORTS_TAG);
        }
        let length = description.chars().count();
        if length > DESCRIPTION_LIMIT {
            return Err(PublishError::Validation(format!(
                "description is {} characters, YouTube allows {}",
                length, DESCRIPTION_LIMIT
            )));
        }

        Ok(UploadRequest {
            platform: PlatformKind::YouTube,
            slot_id: slot.id.clone(),
            title,
            body: description,
            category: Some(self.category_id.clone()),
            content: slot.content,
            media: MediaRef {
                local_path: artifact.local_path.clone(),
                url: artifact.media_url.clone(),
                size_bytes: artifact.size_bytes,
            },
        })
    }

    async fn submit(&self, request: &UploadRequest) -> Result<RemoteHandle, PublishError> {
        let metadata = json!({
            "snippet": {
                "title": request.title,
                "description": request.body,
                "categoryId": request.category.as_deref().unwrap_or(&self.category_id),
            },
            "status": {
                "privacyStatus": self.privacy_status,
                "selfDeclaredMadeForKids": false,
            }
        });

        let response = self
            .client
            .post(&self.upload_url)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(self.token.expose_secret())
            .header("X-Upload-Content-Length", request.media.size_bytes)
            .header("X-Upload-Content-Type", "video/mp4")
            .json(&metadata)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::YouTube, "open upload session", e))?;

        let response = check_response(PlatformKind::YouTube, "open upload session", response).await?;
        let session_uri = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                PublishError::Transient("upload session response had no Location header".to_string())
            })?;

        tracing::debug!(slot = %request.slot_id, "YouTube upload session opened");

        Ok(RemoteHandle {
            platform: PlatformKind::YouTube,
            id: session_uri.clone(),
            session: Some(session_uri),
            needs_processing: false,
            request: request.clone(),
        })
    }

    async fn finalize(&self, handle: &RemoteHandle) -> Result<PublishReceipt, PublishError> {
        let session_uri = handle.session.as_deref().unwrap_or(&handle.id);
        let media = &handle.request.media;

        let file = tokio::fs::File::open(&media.local_path).await.map_err(|e| {
            PublishError::Permanent(format!("cannot open {}: {}", media.local_path.display(), e))
        })?;

        let response = self
            .client
            .put(session_uri)
            .bearer_auth(self.token.expose_secret())
            .header(CONTENT_TYPE, "video/mp4")
            .header(CONTENT_LENGTH, media.size_bytes)
            .body(file)
            .timeout(self.upload_timeout)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::YouTube, "upload video", e))?;

        let video: VideoResource = json_response(PlatformKind::YouTube, "upload video", response).await?;
        tracing::info!(slot = %handle.request.slot_id, video_id = %video.id, "YouTube upload complete");

        Ok(PublishReceipt {
            platform: PlatformKind::YouTube,
            permalink: Some(format!("https://youtu.be/{}", video.id)),
            remote_id: video.id,
        })
    }
}
