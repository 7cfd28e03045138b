//! Instagram Reels via the Graph API
//!
//! Instagram fetches the video itself from a public URL. Publishing creates
//! a media container, waits for the container to reach `FINISHED`, then
//! publishes it.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::http::{json_response, transport_error};
use super::poll::{poll_until_ready, PollContext, PollStatus};
use super::Publisher;
use crate::config::InstagramConfig;
use crate::error::PublishError;
use crate::template::{self, TemplateVars};
use crate::types::{
    MediaRef, PlatformKind, PublishReceipt, ReadySignal, RemoteHandle, Slot, UploadRequest,
    VideoArtifact,
};

pub const CAPTION_LIMIT: usize = 2200;

pub struct InstagramPublisher {
    client: Client,
    graph_url: String,
    user_id: String,
    token: SecretString,
    caption_template: String,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ContainerStatus {
    status_code: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl InstagramPublisher {
    pub fn new(client: Client, config: &InstagramConfig, token: SecretString) -> Self {
        Self {
            client,
            graph_url: config.graph_url.trim_end_matches('/').to_string(),
            user_id: config.user_id.clone(),
            token,
            caption_template: config.caption_template.clone(),
        }
    }

    async fn container_status(&self, container_id: &str) -> Result<PollStatus, PublishError> {
        let url = format!("{}/{}", self.graph_url, container_id);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("fields", "status_code,status"),
                ("access_token", self.token.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Instagram, "container status", e))?;

        let status: ContainerStatus =
            json_response(PlatformKind::Instagram, "container status", response).await?;
        let code = status.status_code.unwrap_or_default();

        match code.as_str() {
            "FINISHED" | "PUBLISHED" => Ok(PollStatus::Ready),
            "ERROR" | "EXPIRED" => Err(PublishError::Permanent(format!(
                "container {} status {}: {}",
                container_id,
                code,
                status.status.unwrap_or_else(|| "no details".to_string())
            ))),
            "" => Ok(PollStatus::Pending("unknown".to_string())),
            _ => Ok(PollStatus::Pending(code)),
        }
    }
}

#[async_trait]
impl Publisher for InstagramPublisher {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Instagram
    }

    fn prepare(&self, artifact: &VideoArtifact, slot: &Slot) -> Result<UploadRequest, PublishError> {
        let url = artifact.media_url.clone().ok_or_else(|| {
            PublishError::Validation(format!(
                "Instagram needs a public media URL for {} but the source provided none",
                artifact.key
            ))
        })?;

        let vars = TemplateVars::new(artifact, slot, PlatformKind::Instagram);
        let caption = template::render(&self.caption_template, &vars)?;
        let length = caption.chars().count();
        if length > CAPTION_LIMIT {
            return Err(PublishError::Validation(format!(
                "caption is {} characters, Instagram allows {}",
                length, CAPTION_LIMIT
            )));
        }

        Ok(UploadRequest {
            platform: PlatformKind::Instagram,
            slot_id: slot.id.clone(),
            title: artifact.metadata.title.clone(),
            body: caption,
            category: None,
            content: slot.content,
            media: MediaRef {
                local_path: artifact.local_path.clone(),
                url: Some(url),
                size_bytes: artifact.size_bytes,
            },
        })
    }

    async fn submit(&self, request: &UploadRequest) -> Result<RemoteHandle, PublishError> {
        let video_url = request.media.url.as_deref().ok_or_else(|| {
            PublishError::Validation("upload request has no media URL".to_string())
        })?;

        let url = format!("{}/{}/media", self.graph_url, self.user_id);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("media_type", "REELS"),
                ("video_url", video_url),
                ("caption", request.body.as_str()),
                ("access_token", self.token.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Instagram, "create container", e))?;

        let container: IdResponse =
            json_response(PlatformKind::Instagram, "create container", response).await?;
        tracing::info!(slot = %request.slot_id, container = %container.id, "Instagram container created");

        Ok(RemoteHandle {
            platform: PlatformKind::Instagram,
            id: container.id,
            session: None,
            needs_processing: true,
            request: request.clone(),
        })
    }

    async fn await_ready(
        &self,
        handle: &RemoteHandle,
        ctx: &PollContext,
    ) -> Result<ReadySignal, PublishError> {
        let container_id = handle.id.as_str();
        poll_until_ready(ctx, "IG container", || self.container_status(container_id)).await
    }

    async fn finalize(&self, handle: &RemoteHandle) -> Result<PublishReceipt, PublishError> {
        let url = format!("{}/{}/media_publish", self.graph_url, self.user_id);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("creation_id", handle.id.as_str()),
                ("access_token", self.token.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Instagram, "publish", e))?;

        let media: IdResponse = json_response(PlatformKind::Instagram, "publish", response).await?;

        Ok(PublishReceipt {
            platform: PlatformKind::Instagram,
            remote_id: media.id,
            permalink: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformTuning;
    use crate::types::{ContentType, VideoMetadata};
    use chrono::{NaiveDate, NaiveTime};
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn publisher(graph_url: &str, template: &str) -> InstagramPublisher {
        let config = InstagramConfig {
            enabled: true,
            user_id: "1784".to_string(),
            token_env: "IG_ACCESS_TOKEN".to_string(),
            caption_template: template.to_string(),
            graph_url: graph_url.to_string(),
            tuning: PlatformTuning::default(),
        };
        InstagramPublisher::new(Client::new(), &config, SecretString::from("ig-token".to_string()))
    }

    fn artifact(media_url: Option<&str>) -> VideoArtifact {
        VideoArtifact {
            key: "reel_9am/sunrise 2026-10-17.mp4".to_string(),
            local_path: "/srv/videos/reel_9am/sunrise 2026-10-17.mp4".into(),
            media_url: media_url.map(str::to_string),
            size_bytes: 1024,
            metadata: VideoMetadata {
                title: "sunrise 2026-10-17".to_string(),
                caption: "sunrise 2026-10-17 | 2026-10-17".to_string(),
                date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
                duration: None,
            },
        }
    }

    fn slot(content: ContentType) -> Slot {
        Slot::new(
            "reel_9am",
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            content,
            &[PlatformKind::Instagram],
        )
    }

    fn poll_ctx() -> PollContext {
        PollContext {
            interval: Duration::from_millis(10),
            budget: Duration::from_secs(5),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_prepare_requires_media_url() {
        let ig = publisher("http://localhost", "{caption}");
        let err = ig.prepare(&artifact(None), &slot(ContentType::Reel)).unwrap_err();
        assert!(matches!(err, PublishError::Validation(_)));
    }

    #[test]
    fn test_prepare_renders_caption() {
        let ig = publisher("http://localhost", "{caption} #reels");
        let request = ig
            .prepare(&artifact(Some("https://cdn/x.mp4")), &slot(ContentType::Standard))
            .unwrap();
        assert_eq!(request.body, "sunrise 2026-10-17 | 2026-10-17 #reels");
        assert_eq!(request.media.url.as_deref(), Some("https://cdn/x.mp4"));
        assert_eq!(request.content, ContentType::Standard);
    }

    #[test]
    fn test_prepare_rejects_long_caption() {
        let long = "x".repeat(CAPTION_LIMIT);
        let ig = publisher("http://localhost", &format!("{} {{title}}", long));
        let err = ig
            .prepare(&artifact(Some("https://cdn/x.mp4")), &slot(ContentType::Reel))
            .unwrap_err();
        assert!(err.detail().contains("2200"));
    }

    #[tokio::test]
    async fn test_full_publish_flow() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/1784/media"))
            .and(body_string_contains("media_type=REELS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c-17"})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/c-17"))
            .and(query_param("fields", "status_code,status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status_code": "IN_PROGRESS", "status": "In Progress", "id": "c-17"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/c-17"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status_code": "FINISHED", "id": "c-17"
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/1784/media_publish"))
            .and(body_string_contains("creation_id=c-17"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "media-99"})))
            .expect(1)
            .mount(&server)
            .await;

        let ig = publisher(&server.uri(), "{caption}");
        let request = ig
            .prepare(&artifact(Some("https://cdn/x.mp4")), &slot(ContentType::Reel))
            .unwrap();
        let handle = ig.submit(&request).await.unwrap();
        assert_eq!(handle.id, "c-17");
        assert!(handle.needs_processing);

        let ready = ig.await_ready(&handle, &poll_ctx()).await.unwrap();
        assert_eq!(ready, ReadySignal::Finished { polls: 2 });

        let receipt = ig.finalize(&handle).await.unwrap();
        assert_eq!(receipt.remote_id, "media-99");
    }

    #[tokio::test]
    async fn test_container_error_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/c-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status_code": "ERROR", "status": "Error: unsupported codec"
            })))
            .mount(&server)
            .await;

        let ig = publisher(&server.uri(), "{caption}");
        let request = ig
            .prepare(&artifact(Some("https://cdn/x.mp4")), &slot(ContentType::Reel))
            .unwrap();
        let handle = RemoteHandle {
            platform: PlatformKind::Instagram,
            id: "c-1".to_string(),
            session: None,
            needs_processing: true,
            request,
        };

        let err = ig.await_ready(&handle, &poll_ctx()).await.unwrap_err();
        assert!(matches!(err, PublishError::Permanent(_)));
        assert!(err.detail().contains("unsupported codec"));
    }

    #[tokio::test]
    async fn test_submit_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1784/media"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": {"message": "An unknown error occurred", "code": 1, "is_transient": true}
            })))
            .mount(&server)
            .await;

        let ig = publisher(&server.uri(), "{caption}");
        let request = ig
            .prepare(&artifact(Some("https://cdn/x.mp4")), &slot(ContentType::Reel))
            .unwrap();
        let err = ig.submit(&request).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
