//! X (Twitter) via chunked media upload and the v2 tweets endpoint

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use super::http::{check_response, json_response, transport_error};
use super::poll::{poll_until_ready, PollContext, PollStatus};
use super::{read_range, Publisher};
use crate::config::XConfig;
use crate::error::PublishError;
use crate::template::{self, TemplateVars};
use crate::types::{
    MediaRef, PlatformKind, PublishReceipt, ReadySignal, RemoteHandle, Slot, UploadRequest,
    VideoArtifact,
};

pub const TEXT_LIMIT: usize = 280;
pub const VIDEO_SIZE_LIMIT: u64 = 512 * 1024 * 1024;

pub struct XPublisher {
    client: Client,
    upload_url: String,
    api_url: String,
    token: SecretString,
    text_template: String,
    chunk_size: u64,
    upload_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct MediaResponse {
    media_id_string: String,
    #[serde(default)]
    processing_info: Option<ProcessingInfo>,
}

#[derive(Debug, Deserialize)]
struct ProcessingInfo {
    state: String,
    #[serde(default)]
    error: Option<ProcessingError>,
}

#[derive(Debug, Deserialize)]
struct ProcessingError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
}

fn processing_failure(media_id: &str, info: &ProcessingInfo) -> PublishError {
    let message = info
        .error
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| "no details".to_string());
    PublishError::Permanent(format!("media {} processing failed: {}", media_id, message))
}

impl XPublisher {
    pub fn new(client: Client, config: &XConfig, token: SecretString, upload_timeout: Duration) -> Self {
        Self {
            client,
            upload_url: config.upload_url.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            text_template: config.text_template.clone(),
            chunk_size: config.chunk_size as u64,
            upload_timeout,
        }
    }

    async fn command(&self, context: &str, params: &[(&str, &str)]) -> Result<MediaResponse, PublishError> {
        let response = self
            .client
            .post(&self.upload_url)
            .bearer_auth(self.token.expose_secret())
            .form(params)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::X, context, e))?;

        json_response(PlatformKind::X, context, response).await
    }

    async fn append(&self, media_id: &str, segment_index: u32, chunk: Vec<u8>) -> Result<(), PublishError> {
        let form = Form::new()
            .text("command", "APPEND")
            .text("media_id", media_id.to_string())
            .text("segment_index", segment_index.to_string())
            .part("media", Part::bytes(chunk).file_name("segment"));

        let response = self
            .client
            .post(&self.upload_url)
            .bearer_auth(self.token.expose_secret())
            .multipart(form)
            .timeout(self.upload_timeout)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::X, "append segment", e))?;

        check_response(PlatformKind::X, "append segment", response).await?;
        Ok(())
    }

    async fn status(&self, media_id: &str) -> Result<PollStatus, PublishError> {
        let response = self
            .client
            .get(&self.upload_url)
            .bearer_auth(self.token.expose_secret())
            .query(&[("command", "STATUS"), ("media_id", media_id)])
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::X, "media status", e))?;

        let media: MediaResponse = json_response(PlatformKind::X, "media status", response).await?;
        let Some(info) = media.processing_info else {
            return Ok(PollStatus::Ready);
        };

        match info.state.as_str() {
            "succeeded" => Ok(PollStatus::Ready),
            "failed" => Err(processing_failure(media_id, &info)),
            _ => Ok(PollStatus::Pending(info.state)),
        }
    }
}

#[async_trait]
impl Publisher for XPublisher {
    fn kind(&self) -> PlatformKind {
        PlatformKind::X
    }

    fn prepare(&self, artifact: &VideoArtifact, slot: &Slot) -> Result<UploadRequest, PublishError> {
        if artifact.size_bytes == 0 || artifact.size_bytes > VIDEO_SIZE_LIMIT {
            return Err(PublishError::Validation(format!(
                "{} is {} bytes, X accepts 1 to {} bytes",
                artifact.key, artifact.size_bytes, VIDEO_SIZE_LIMIT
            )));
        }

        let vars = TemplateVars::new(artifact, slot, PlatformKind::X);
        let text = template::render(&self.text_template, &vars)?;
        let length = text.chars().count();
        if length > TEXT_LIMIT {
            return Err(PublishError::Validation(format!(
                "post text is {} characters, X allows {}",
                length, TEXT_LIMIT
            )));
        }

        Ok(UploadRequest {
            platform: PlatformKind::X,
            slot_id: slot.id.clone(),
            title: artifact.metadata.title.clone(),
            body: text,
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
        let total = request.media.size_bytes;
        let total_bytes = total.to_string();
        let init = self
            .command(
                "init upload",
                &[
                    ("command", "INIT"),
                    ("total_bytes", total_bytes.as_str()),
                    ("media_type", "video/mp4"),
                    ("media_category", "tweet_video"),
                ],
            )
            .await?;
        let media_id = init.media_id_string;

        let mut offset = 0u64;
        let mut segment_index = 0u32;
        while offset < total {
            let len = self.chunk_size.min(total - offset);
            let chunk = read_range(&request.media.local_path, offset, len).await?;
            if chunk.is_empty() {
                return Err(PublishError::Permanent(format!(
                    "read 0 bytes at offset {} of {}",
                    offset,
                    request.media.local_path.display()
                )));
            }
            offset += chunk.len() as u64;
            self.append(&media_id, segment_index, chunk).await?;
            segment_index += 1;
        }

        let finalized = self
            .command("finalize upload", &[("command", "FINALIZE"), ("media_id", media_id.as_str())])
            .await?;

        let needs_processing = match &finalized.processing_info {
            None => false,
            Some(info) if info.state == "succeeded" => false,
            Some(info) if info.state == "failed" => return Err(processing_failure(&media_id, info)),
            Some(_) => true,
        };

        tracing::info!(
            slot = %request.slot_id,
            media_id = %media_id,
            segments = segment_index,
            needs_processing,
            "X media uploaded"
        );

        Ok(RemoteHandle {
            platform: PlatformKind::X,
            id: media_id,
            session: None,
            needs_processing,
            request: request.clone(),
        })
    }

    async fn await_ready(
        &self,
        handle: &RemoteHandle,
        ctx: &PollContext,
    ) -> Result<ReadySignal, PublishError> {
        if !handle.needs_processing {
            return Ok(ReadySignal::Immediate);
        }
        let media_id = handle.id.as_str();
        poll_until_ready(ctx, "X media", || self.status(media_id)).await
    }

    async fn finalize(&self, handle: &RemoteHandle) -> Result<PublishReceipt, PublishError> {
        let body = json!({
            "text": handle.request.body,
            "media": { "media_ids": [handle.id] },
        });

        let response = self
            .client
            .post(format!("{}/tweets", self.api_url))
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::X, "create post", e))?;

        let tweet: TweetResponse = json_response(PlatformKind::X, "create post", response).await?;

        Ok(PublishReceipt {
            platform: PlatformKind::X,
            permalink: Some(format!("https://x.com/i/web/status/{}", tweet.data.id)),
            remote_id: tweet.data.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformTuning;
    use crate::types::{ContentType, VideoMetadata};
    use chrono::{NaiveDate, NaiveTime};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{body_partial_json, body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn publisher(server: &str, template: &str, chunk_size: usize) -> XPublisher {
        let config = XConfig {
            enabled: true,
            token_env: "X_ACCESS_TOKEN".to_string(),
            text_template: template.to_string(),
            upload_url: format!("{}/1.1/media/upload.json", server),
            api_url: format!("{}/2", server),
            chunk_size,
            tuning: PlatformTuning::default(),
        };
        XPublisher::new(
            Client::new(),
            &config,
            SecretString::from("x-token".to_string()),
            Duration::from_secs(30),
        )
    }

    fn artifact(dir: &TempDir, bytes: &[u8]) -> VideoArtifact {
        let local_path = dir.path().join("clip.mp4");
        std::fs::write(&local_path, bytes).unwrap();
        VideoArtifact {
            key: "reel_4pm/clip.mp4".to_string(),
            local_path,
            media_url: None,
            size_bytes: bytes.len() as u64,
            metadata: VideoMetadata {
                title: "clip".to_string(),
                caption: "clip | 2026-10-17".to_string(),
                date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
                duration: None,
            },
        }
    }

    fn slot() -> Slot {
        Slot::new(
            "reel_4pm",
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            ContentType::Reel,
            &[PlatformKind::X],
        )
    }

    #[test]
    fn test_prepare_enforces_text_limit() {
        let dir = TempDir::new().unwrap();
        let x = publisher("http://localhost", &format!("{} {{caption}}", "y".repeat(280)), 4);
        let err = x.prepare(&artifact(&dir, b"abc"), &slot()).unwrap_err();
        assert!(matches!(err, PublishError::Validation(_)));
        assert!(err.detail().contains("280"));
    }

    #[tokio::test]
    async fn test_chunked_upload_with_processing() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("POST"))
            .and(path("/1.1/media/upload.json"))
            .and(body_string_contains("command=INIT"))
            .and(body_string_contains("total_bytes=10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"media_id_string": "m-1"})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/1.1/media/upload.json"))
            .and(body_string_contains("APPEND"))
            .respond_with(ResponseTemplate::new(204))
            .expect(3)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/1.1/media/upload.json"))
            .and(body_string_contains("command=FINALIZE"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "media_id_string": "m-1",
                "processing_info": {"state": "pending", "check_after_secs": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/1.1/media/upload.json"))
            .and(query_param("command", "STATUS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "media_id_string": "m-1",
                "processing_info": {"state": "succeeded"}
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .and(body_partial_json(json!({"media": {"media_ids": ["m-1"]}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "data": {"id": "1850000000000000000", "text": "clip | 2026-10-17"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let x = publisher(&server.uri(), "{caption}", 4);
        let request = x.prepare(&artifact(&dir, b"0123456789"), &slot()).unwrap();
        let handle = x.submit(&request).await.unwrap();
        assert!(handle.needs_processing);

        let ctx = PollContext {
            interval: Duration::from_millis(10),
            budget: Duration::from_secs(5),
            cancel: CancellationToken::new(),
        };
        let ready = x.await_ready(&handle, &ctx).await.unwrap();
        assert_eq!(ready, ReadySignal::Finished { polls: 1 });

        let receipt = x.finalize(&handle).await.unwrap();
        assert_eq!(receipt.remote_id, "1850000000000000000");
    }

    #[tokio::test]
    async fn test_no_processing_info_is_immediate() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("POST"))
            .and(path("/1.1/media/upload.json"))
            .and(body_string_contains("APPEND"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/1.1/media/upload.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"media_id_string": "m-2"})))
            .mount(&server)
            .await;

        let x = publisher(&server.uri(), "{caption}", 1024);
        let request = x.prepare(&artifact(&dir, b"abc"), &slot()).unwrap();
        let handle = x.submit(&request).await.unwrap();
        assert!(!handle.needs_processing);

        let ctx = PollContext {
            interval: Duration::from_secs(1),
            budget: Duration::from_secs(2),
            cancel: CancellationToken::new(),
        };
        assert_eq!(x.await_ready(&handle, &ctx).await.unwrap(), ReadySignal::Immediate);
    }

    #[tokio::test]
    async fn test_failed_processing_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1.1/media/upload.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "media_id_string": "m-3",
                "processing_info": {"state": "failed", "error": {"code": 1, "message": "InvalidMedia"}}
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let x = publisher(&server.uri(), "{caption}", 1024);
        let request = x.prepare(&artifact(&dir, b"abc"), &slot()).unwrap();
        let handle = RemoteHandle {
            platform: PlatformKind::X,
            id: "m-3".to_string(),
            session: None,
            needs_processing: true,
            request,
        };
        let ctx = PollContext {
            interval: Duration::from_millis(10),
            budget: Duration::from_secs(5),
            cancel: CancellationToken::new(),
        };
        let err = x.await_ready(&handle, &ctx).await.unwrap_err();
        assert!(matches!(err, PublishError::Permanent(_)));
        assert!(err.detail().contains("InvalidMedia"));
    }
}
