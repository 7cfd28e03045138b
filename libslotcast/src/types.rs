//! Core types for Slotcast

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Platforms a slot can publish to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Instagram,
    Facebook,
    #[serde(rename = "youtube")]
    YouTube,
    #[serde(alias = "twitter")]
    X,
    TikTok,
}

impl PlatformKind {
    pub const ALL: [PlatformKind; 5] = [
        PlatformKind::Instagram,
        PlatformKind::Facebook,
        PlatformKind::YouTube,
        PlatformKind::X,
        PlatformKind::TikTok,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
            Self::YouTube => "youtube",
            Self::X => "x",
            Self::TikTok => "tiktok",
        }
    }

    /// Short code used in outcome reasons, e.g. "IG timeout"
    pub fn short_code(&self) -> &'static str {
        match self {
            Self::Instagram => "IG",
            Self::Facebook => "FB",
            Self::YouTube => "YT",
            Self::X => "X",
            Self::TikTok => "TT",
        }
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "instagram" | "ig" => Ok(Self::Instagram),
            "facebook" | "fb" => Ok(Self::Facebook),
            "youtube" | "yt" => Ok(Self::YouTube),
            "x" | "twitter" => Ok(Self::X),
            "tiktok" | "tt" => Ok(Self::TikTok),
            _ => Err(format!(
                "Unknown platform: '{}'. Valid options: instagram, facebook, youtube, x, tiktok",
                s
            )),
        }
    }
}

/// Kind of video a slot carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Short vertical clip (Reels, Shorts)
    #[serde(alias = "short")]
    Reel,
    /// Regular long-form video
    Standard,
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reel => write!(f, "reel"),
            Self::Standard => write!(f, "standard"),
        }
    }
}

/// A named, time-scheduled posting opportunity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: String,
    #[serde(
        rename = "time",
        deserialize_with = "deserialize_time_of_day",
        serialize_with = "serialize_time_of_day"
    )]
    pub scheduled: NaiveTime,
    pub content: ContentType,
    pub platforms: Vec<PlatformKind>,
    /// Source prefix (directory) the slot's video is taken from; defaults to the id
    #[serde(default)]
    pub source: Option<String>,
}

impl Slot {
    pub fn new(id: &str, scheduled: NaiveTime, content: ContentType, platforms: &[PlatformKind]) -> Self {
        Self {
            id: id.to_string(),
            scheduled,
            content,
            platforms: platforms.to_vec(),
            source: None,
        }
    }

    pub fn source_prefix(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.id)
    }

    pub fn targets(&self, platform: PlatformKind) -> bool {
        self.platforms.contains(&platform)
    }
}

fn deserialize_time_of_day<'de, D>(deserializer: D) -> std::result::Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_time_of_day(&raw).map_err(serde::de::Error::custom)
}

fn serialize_time_of_day<S>(time: &NaiveTime, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&time.format("%H:%M").to_string())
}

/// Parse "09:30" or "09:30:00"
pub fn parse_time_of_day(raw: &str) -> std::result::Result<NaiveTime, String> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| format!("Invalid time of day '{}': expected HH:MM", raw))
}

/// Metadata extracted from the source video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub caption: String,
    pub date: NaiveDate,
    /// Unknown when the resolver does not inspect the container
    pub duration: Option<Duration>,
}

/// A resolved source video, shared read-only by every publisher of a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoArtifact {
    /// Storage key relative to the source root, e.g. "reels/9am/clip.mp4"
    pub key: String,
    pub local_path: PathBuf,
    /// URL the platform can pull the video from (Instagram requires one)
    pub media_url: Option<String>,
    pub size_bytes: u64,
    pub metadata: VideoMetadata,
}

/// Media reference carried in an upload request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub local_path: PathBuf,
    pub url: Option<String>,
    pub size_bytes: u64,
}

/// Platform payload built by `prepare`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub platform: PlatformKind,
    pub slot_id: String,
    pub title: String,
    /// Caption, description or post text depending on the platform
    pub body: String,
    pub category: Option<String>,
    pub content: ContentType,
    pub media: MediaRef,
}

/// Platform-side reference returned by `submit`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHandle {
    pub platform: PlatformKind,
    /// Container id, media id, video id or resumable session URI
    pub id: String,
    /// Upload session id or resumable session URI, when the platform uses one
    pub session: Option<String>,
    /// Whether the platform still processes the media asynchronously
    pub needs_processing: bool,
    /// Request fields `finalize` needs again (title, caption)
    pub request: UploadRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadySignal {
    /// Nothing to wait for
    Immediate,
    /// Platform reported completion after this many status checks
    Finished { polls: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub platform: PlatformKind,
    pub remote_id: String,
    pub permalink: Option<String>,
}

/// Publish state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishState {
    Prepared,
    Submitted,
    Pending,
    Polling,
    Published,
    Errored,
}

impl std::fmt::Display for PublishState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Prepared => "PREPARED",
            Self::Submitted => "SUBMITTED",
            Self::Pending => "PENDING",
            Self::Polling => "POLLING",
            Self::Published => "PUBLISHED",
            Self::Errored => "ERRORED",
        };
        write!(f, "{}", s)
    }
}

/// One retry iteration of one (slot, platform) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAttempt {
    pub platform: PlatformKind,
    pub slot_id: String,
    pub attempt: u32,
    pub state: PublishState,
    /// Last non-terminal state the attempt reached before it ended
    pub reached: PublishState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    Skipped,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Skipped => "SKIPPED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal status of one (slot, platform) pair for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotOutcome {
    pub slot_id: String,
    pub platform: PlatformKind,
    pub status: OutcomeStatus,
    /// Human-readable reason for non-success, e.g. "no video" or "IG timeout"
    pub reason: Option<String>,
    pub detail: Option<String>,
    pub attempts: u32,
    pub receipt: Option<PublishReceipt>,
}

impl SlotOutcome {
    pub fn success(slot_id: &str, receipt: PublishReceipt, attempts: u32) -> Self {
        Self {
            slot_id: slot_id.to_string(),
            platform: receipt.platform,
            status: OutcomeStatus::Success,
            reason: None,
            detail: None,
            attempts,
            receipt: Some(receipt),
        }
    }

    pub fn skipped(slot_id: &str, platform: PlatformKind, reason: &str) -> Self {
        Self {
            slot_id: slot_id.to_string(),
            platform,
            status: OutcomeStatus::Skipped,
            reason: Some(reason.to_string()),
            detail: None,
            attempts: 0,
            receipt: None,
        }
    }

    pub fn failed(
        slot_id: &str,
        platform: PlatformKind,
        reason: String,
        detail: Option<String>,
        attempts: u32,
    ) -> Self {
        Self {
            slot_id: slot_id.to_string(),
            platform,
            status: OutcomeStatus::Failed,
            reason: Some(reason),
            detail,
            attempts,
            receipt: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_kind_from_str() {
        assert_eq!("instagram".parse::<PlatformKind>().unwrap(), PlatformKind::Instagram);
        assert_eq!("FB".parse::<PlatformKind>().unwrap(), PlatformKind::Facebook);
        assert_eq!("YouTube".parse::<PlatformKind>().unwrap(), PlatformKind::YouTube);
        assert_eq!("twitter".parse::<PlatformKind>().unwrap(), PlatformKind::X);
        assert_eq!("TikTok".parse::<PlatformKind>().unwrap(), PlatformKind::TikTok);
        assert!("snapchat".parse::<PlatformKind>().is_err());
    }

    #[test]
    fn test_platform_kind_serde_names() {
        let json = serde_json::to_string(&PlatformKind::YouTube).unwrap();
        assert_eq!(json, "\"youtube\"");
        let parsed: PlatformKind = serde_json::from_str("\"twitter\"").unwrap();
        assert_eq!(parsed, PlatformKind::X);
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(
            parse_time_of_day("09:30").unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
        assert_eq!(
            parse_time_of_day("16:30:15").unwrap(),
            NaiveTime::from_hms_opt(16, 30, 15).unwrap()
        );
        assert!(parse_time_of_day("9.30am").is_err());
        assert!(parse_time_of_day("25:00").is_err());
    }

    #[test]
    fn test_slot_deserialize_from_toml() {
        let slot: Slot = toml::from_str(
            r#"
            id = "reel_9am"
            time = "09:00"
            content = "short"
            platforms = ["youtube", "facebook", "instagram"]
            source = "reels n shorts/9am content"
            "#,
        )
        .unwrap();

        assert_eq!(slot.id, "reel_9am");
        assert_eq!(slot.scheduled, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(slot.content, ContentType::Reel);
        assert_eq!(slot.platforms.len(), 3);
        assert_eq!(slot.source_prefix(), "reels n shorts/9am content");
    }

    #[test]
    fn test_slot_source_defaults_to_id() {
        let slot = Slot::new(
            "std_4_30pm",
            NaiveTime::from_hms_opt(16, 30, 0).unwrap(),
            ContentType::Standard,
            &[PlatformKind::YouTube],
        );
        assert_eq!(slot.source_prefix(), "std_4_30pm");
        assert!(slot.targets(PlatformKind::YouTube));
        assert!(!slot.targets(PlatformKind::Instagram));
    }

    #[test]
    fn test_outcome_constructors() {
        let skipped = SlotOutcome::skipped("std_9_30am", PlatformKind::Facebook, "no video");
        assert_eq!(skipped.status, OutcomeStatus::Skipped);
        assert_eq!(skipped.attempts, 0);
        assert_eq!(skipped.reason.as_deref(), Some("no video"));

        let receipt = PublishReceipt {
            platform: PlatformKind::Instagram,
            remote_id: "1789".to_string(),
            permalink: None,
        };
        let success = SlotOutcome::success("reel_9am", receipt, 1);
        assert_eq!(success.platform, PlatformKind::Instagram);
        assert_eq!(success.status.to_string(), "SUCCESS");
    }
}
