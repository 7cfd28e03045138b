//! Facebook Page video via the Graph resumable upload
//!
//! Three phases against `{graph_video}/{page_id}/videos`: `start` opens a
//! session for the file size, `transfer` sends the byte ranges the server
//! asks for until the offsets meet, `finish` publishes with title and
//! description. There is no asynchronous processing step to wait for.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

use super::http::{json_response, transport_error};
use super::{read_range, truncate_chars, Publisher};
use crate::config::FacebookConfig;
use crate::error::PublishError;
use crate::template::{self, TemplateVars};
use crate::types::{
    MediaRef, PlatformKind, PublishReceipt, RemoteHandle, Slot, UploadRequest, VideoArtifact,
};

pub const TITLE_LIMIT: usize = 100;

pub struct FacebookPublisher {
    client: Client,
    graph_video_url: String,
    page_id: String,
    token: SecretString,
    description_template: String,
    upload_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    video_id: String,
    upload_session_id: String,
    #[serde(deserialize_with = "offset")]
    start_offset: u64,
    #[serde(deserialize_with = "offset")]
    end_offset: u64,
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    #[serde(deserialize_with = "offset")]
    start_offset: u64,
    #[serde(deserialize_with = "offset")]
    end_offset: u64,
}

#[derive(Debug, Deserialize)]
struct FinishResponse {
    #[serde(default)]
    success: bool,
}

/// Graph returns offsets as decimal strings
fn offset<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

impl FacebookPublisher {
    pub fn new(
        client: Client,
        config: &FacebookConfig,
        token: SecretString,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            client,
            graph_video_url: config.graph_video_url.trim_end_matches('/').to_string(),
            page_id: config.page_id.clone(),
            token,
            description_template: config.description_template.clone(),
            upload_timeout,
        }
    }

    fn videos_url(&self) -> String {
        format!("{}/{}/videos", self.graph_video_url, self.page_id)
    }

    async fn start(&self, file_size: u64) -> Result<StartResponse, PublishError> {
        let size = file_size.to_string();
        let response = self
            .client
            .post(self.videos_url())
            .form(&[
                ("upload_phase", "start"),
                ("file_size", size.as_str()),
                ("access_token", self.token.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Facebook, "start upload", e))?;

        json_response(PlatformKind::Facebook, "start upload", response).await
    }

    async fn transfer(
        &self,
        session_id: &str,
        start: u64,
        chunk: Vec<u8>,
    ) -> Result<TransferResponse, PublishError> {
        let form = Form::new()
            .text("upload_phase", "transfer")
            .text("upload_session_id", session_id.to_string())
            .text("start_offset", start.to_string())
            .text("access_token", self.token.expose_secret().to_string())
            .part("video_file_chunk", Part::bytes(chunk).file_name("chunk"));

        let response = self
            .client
            .post(self.videos_url())
            .multipart(form)
            .timeout(self.upload_timeout)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Facebook, "transfer chunk", e))?;

        json_response(PlatformKind::Facebook, "transfer chunk", response).await
    }
}

#[async_trait]
impl Publisher for FacebookPublisher {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Facebook
    }

    fn prepare(&self, artifact: &VideoArtifact, slot: &Slot) -> Result<UploadRequest, PublishError> {
        if artifact.size_bytes == 0 {
            return Err(PublishError::Validation(format!("{} is empty", artifact.key)));
        }

        let vars = TemplateVars::new(artifact, slot, PlatformKind::Facebook);
        let description = template::render(&self.description_template, &vars)?;

        Ok(UploadRequest {
            platform: PlatformKind::Facebook,
            slot_id: slot.id.clone(),
            title: truncate_chars(&description, TITLE_LIMIT),
            body: description,
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
        let session = self.start(request.media.size_bytes).await?;
        tracing::debug!(
            slot = %request.slot_id,
            video_id = %session.video_id,
            "Facebook upload session started"
        );

        let mut start = session.start_offset;
        let mut end = session.end_offset;
        let mut chunks = 0u32;

        while start < end {
            let chunk = read_range(&request.media.local_path, start, end - start).await?;
            if chunk.is_empty() {
                return Err(PublishError::Permanent(format!(
                    "read 0 bytes at offset {} of {}",
                    start,
                    request.media.local_path.display()
                )));
            }

            let next = self.transfer(&session.upload_session_id, start, chunk).await?;
            if next.start_offset <= start && next.start_offset < next.end_offset {
                return Err(PublishError::Permanent(format!(
                    "upload session did not advance past offset {}",
                    start
                )));
            }
            start = next.start_offset;
            end = next.end_offset;
            chunks += 1;
        }

        tracing::info!(slot = %request.slot_id, chunks, "Facebook upload transferred");

        Ok(RemoteHandle {
            platform: PlatformKind::Facebook,
            id: session.video_id,
            session: Some(session.upload_session_id),
            needs_processing: false,
            request: request.clone(),
        })
    }

    async fn finalize(&self, handle: &RemoteHandle) -> Result<PublishReceipt, PublishError> {
        let session_id = handle.session.as_deref().ok_or_else(|| {
            PublishError::Permanent("Facebook handle has no upload session".to_string())
        })?;

        let response = self
            .client
            .post(self.videos_url())
            .form(&[
                ("upload_phase", "finish"),
                ("upload_session_id", session_id),
                ("description", handle.request.body.as_str()),
                ("title", handle.request.title.as_str()),
                ("access_token", self.token.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Facebook, "finish upload", e))?;

        let finish: FinishResponse =
            json_response(PlatformKind::Facebook, "finish upload", response).await?;
        if !finish.success {
            return Err(PublishError::Permanent(format!(
                "finish phase for video {} did not report success",
                handle.id
            )));
        }

        Ok(PublishReceipt {
            platform: PlatformKind::Facebook,
            remote_id: handle.id.clone(),
            permalink: Some(format!("https://www.facebook.com/{}/videos/{}", self.page_id, handle.id)),
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
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn publisher(url: &str, template: &str) -> FacebookPublisher {
        let config = FacebookConfig {
            enabled: true,
            page_id: "3204".to_string(),
            token_env: "META_ACCESS_TOKEN".to_string(),
            description_template: template.to_string(),
            graph_video_url: url.to_string(),
            tuning: PlatformTuning::default(),
        };
        FacebookPublisher::new(
            Client::new(),
            &config,
            SecretString::from("fb-token".to_string()),
            Duration::from_secs(30),
        )
    }

    fn artifact(dir: &TempDir, bytes: &[u8], title: &str) -> VideoArtifact {
        let local_path = dir.path().join("clip.mp4");
        std::fs::write(&local_path, bytes).unwrap();
        VideoArtifact {
            key: "std_9_30am/clip.mp4".to_string(),
            local_path,
            media_url: None,
            size_bytes: bytes.len() as u64,
            metadata: VideoMetadata {
                title: title.to_string(),
                caption: format!("{} | 2026-10-17", title),
                date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
                duration: None,
            },
        }
    }

    fn slot() -> Slot {
        Slot::new(
            "std_9_30am",
            NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            ContentType::Standard,
            &[PlatformKind::Facebook],
        )
    }

    #[test]
    fn test_prepare_truncates_title() {
        let dir = TempDir::new().unwrap();
        let long_title = "a".repeat(150);
        let fb = publisher("http://localhost", "{caption}");
        let request = fb.prepare(&artifact(&dir, b"data", &long_title), &slot()).unwrap();
        assert_eq!(request.title.chars().count(), TITLE_LIMIT);
        assert!(request.body.ends_with("| 2026-10-17"));
    }

    #[test]
    fn test_prepare_rejects_empty_file() {
        let dir = TempDir::new().unwrap();
        let fb = publisher("http://localhost", "{caption}");
        let err = fb.prepare(&artifact(&dir, b"", "t"), &slot()).unwrap_err();
        assert!(matches!(err, PublishError::Validation(_)));
    }

    #[test]
    fn test_offsets_accept_strings_and_numbers() {
        let parsed: TransferResponse =
            serde_json::from_value(json!({"start_offset": "4", "end_offset": 10})).unwrap();
        assert_eq!((parsed.start_offset, parsed.end_offset), (4, 10));
    }

    #[tokio::test]
    async fn test_chunked_upload_and_finish() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("POST"))
            .and(path("/3204/videos"))
            .and(body_string_contains("upload_phase=start"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "video_id": "v-55",
                "upload_session_id": "s-1",
                "start_offset": "0",
                "end_offset": "6"
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/3204/videos"))
            .and(body_string_contains("name=\"start_offset\"\r\n\r\n0\r\n"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "start_offset": "6", "end_offset": "10"
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/3204/videos"))
            .and(body_string_contains("name=\"start_offset\"\r\n\r\n6\r\n"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "start_offset": "10", "end_offset": "10"
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/3204/videos"))
            .and(body_string_contains("upload_phase=finish"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let fb = publisher(&server.uri(), "{caption}");
        let request = fb.prepare(&artifact(&dir, b"0123456789", "clip"), &slot()).unwrap();
        let handle = fb.submit(&request).await.unwrap();
        assert_eq!(handle.id, "v-55");
        assert_eq!(handle.session.as_deref(), Some("s-1"));
        assert!(!handle.needs_processing);

        let receipt = fb.finalize(&handle).await.unwrap();
        assert_eq!(receipt.remote_id, "v-55");
        assert_eq!(
            receipt.permalink.as_deref(),
            Some("https://www.facebook.com/3204/videos/v-55")
        );
    }

    #[tokio::test]
    async fn test_start_auth_failure_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/3204/videos"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Invalid OAuth access token.", "code": 190}
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let fb = publisher(&server.uri(), "{caption}");
        let request = fb.prepare(&artifact(&dir, b"0123", "clip"), &slot()).unwrap();
        let err = fb.submit(&request).await.unwrap_err();
        assert!(matches!(err, PublishError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_finish_without_success_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/3204/videos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false})))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let fb = publisher(&server.uri(), "{caption}");
        let request = fb.prepare(&artifact(&dir, b"0123", "clip"), &slot()).unwrap();
        let handle = RemoteHandle {
            platform: PlatformKind::Facebook,
            id: "v-1".to_string(),
            session: Some("s-1".to_string()),
            needs_processing: false,
            request,
        };
        let err = fb.finalize(&handle).await.unwrap_err();
        assert!(matches!(err, PublishError::Permanent(_)));
    }
}
