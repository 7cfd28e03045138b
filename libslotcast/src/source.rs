//! Source video resolution
//!
//! A [`SourceResolver`] turns a slot into the video it should publish. The
//! orchestrator calls it exactly once per slot and never retries it.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use regex::Regex;
use reqwest::Url;

use crate::error::SourceError;
use crate::types::{Slot, VideoArtifact, VideoMetadata};

/// Result of resolving a slot's source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(VideoArtifact),
    /// Nothing to publish for this slot today
    Absent { reason: String },
}

#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, slot: &Slot) -> Result<Resolution, SourceError>;
}

/// Resolver over a local directory that mirrors the storage bucket
///
/// Each slot reads `<root>/<slot source prefix>/` and takes the
/// lexicographically greatest `.mp4` file, which with date-stamped names is
/// the newest upload.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    public_base_url: Option<Url>,
    offset: FixedOffset,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<&str>) -> Result<Self, SourceError> {
        let public_base_url = public_base_url
            .map(|raw| Url::parse(raw).map_err(|e| SourceError::Url(format!("{}: {}", raw, e))))
            .transpose()?;

        if let Some(url) = &public_base_url {
            if url.cannot_be_a_base() {
                return Err(SourceError::Url(format!("{} cannot be used as a base URL", url)));
            }
        }

        Ok(Self {
            root: root.into(),
            public_base_url,
            offset: Utc.fix(),
        })
    }

    /// Offset used to compute "today" for files without a date in their name
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    fn media_url(&self, key: &str) -> Result<Option<String>, SourceError> {
        let Some(base) = &self.public_base_url else {
            return Ok(None);
        };

        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::Url(format!("{} cannot be used as a base URL", base)))?
            .pop_if_empty()
            .extend(key.split('/'));

        Ok(Some(url.to_string()))
    }

    async fn latest_video(dir: &Path) -> Result<Option<(String, PathBuf, u64)>, SourceError> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut latest: Option<(String, PathBuf, u64)> = None;

        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_mp4(&name) {
                continue;
            }
            if latest.as_ref().map_or(true, |(current, _, _)| name > *current) {
                latest = Some((name, entry.path(), metadata.len()));
            }
        }

        Ok(latest)
    }
}

#[async_trait]
impl SourceResolver for DirectorySource {
    async fn resolve(&self, slot: &Slot) -> Result<Resolution, SourceError> {
        if !tokio::fs::try_exists(&self.root).await? {
            return Err(SourceError::NotFound(self.root.display().to_string()));
        }

        let prefix = slot.source_prefix().trim_matches('/');
        let dir = self.root.join(prefix);
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(Resolution::Absent {
                reason: format!("no directory '{}' under source root", prefix),
            });
        }

        let Some((name, local_path, size_bytes)) = Self::latest_video(&dir).await? else {
            return Ok(Resolution::Absent {
                reason: format!("no .mp4 files under '{}'", prefix),
            });
        };

        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", prefix, name)
        };
        let today = Utc::now().with_timezone(&self.offset).date_naive();

        tracing::debug!(slot = %slot.id, key = %key, size_bytes, "Resolved source video");

        Ok(Resolution::Found(VideoArtifact {
            media_url: self.media_url(&key)?,
            key,
            local_path,
            size_bytes,
            metadata: extract_metadata(&name, today),
        }))
    }
}

fn is_mp4(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"))
}

fn date_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\d{4}-\d{2}-\d{2}").ok())
        .as_ref()
}

/// Derive title, date and caption from a file name
///
/// The title is the file stem. The date is the first valid `YYYY-MM-DD`
/// in the name, or `today`. The caption is `"{title} | {date}"`.
pub fn extract_metadata(file_name: &str, today: NaiveDate) -> VideoMetadata {
    let path = Path::new(file_name);
    let title = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());

    let date = date_pattern()
        .and_then(|re| {
            re.find_iter(file_name)
                .find_map(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok())
        })
        .unwrap_or(today);

    VideoMetadata {
        caption: format!("{} | {}", title, date.format("%Y-%m-%d")),
        title,
        date,
        duration: None,
    }
}
