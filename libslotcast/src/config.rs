//! Configuration management for Slotcast

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::template;
use crate::types::{PlatformKind, Slot};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub polling: PollSettings,
    #[serde(default)]
    pub http: HttpSettings,
    pub instagram: Option<InstagramConfig>,
    pub facebook: Option<FacebookConfig>,
    pub youtube: Option<YouTubeConfig>,
    pub x: Option<XConfig>,
    pub tiktok: Option<TikTokConfig>,
    #[serde(default)]
    pub slots: Vec<Slot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// How far from its scheduled time a slot still counts as due
    #[serde(with = "duration_str", default = "default_tolerance")]
    pub tolerance: Duration,
    /// Offset slot times are expressed in, e.g. "+05:30"
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            utc_offset: default_utc_offset(),
        }
    }
}

impl ScheduleConfig {
    pub fn offset(&self) -> std::result::Result<FixedOffset, ConfigError> {
        self.utc_offset.parse::<FixedOffset>().map_err(|e| {
            ConfigError::Invalid(format!(
                "schedule.utc_offset '{}' is not a valid offset (expected e.g. +05:30): {}",
                self.utc_offset, e
            ))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Local directory mirroring the storage bucket
    pub root: String,
    /// Public or pre-signed base URL the bucket is served from
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(with = "duration_str", default = "default_initial_backoff")]
    pub initial_backoff: Duration,
    #[serde(with = "duration_str", default = "default_max_backoff")]
    pub max_backoff: Duration,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            multiplier: default_multiplier(),
            jitter: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollSettings {
    #[serde(with = "duration_str", default = "default_poll_interval")]
    pub interval: Duration,
    /// Wall-clock budget for one `await_ready` call
    #[serde(with = "duration_str", default = "default_poll_budget")]
    pub budget: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            budget: default_poll_budget(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Timeout for API calls
    #[serde(with = "duration_str", default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Timeout for requests carrying video bytes
    #[serde(with = "duration_str", default = "default_upload_timeout")]
    pub upload_timeout: Duration,
    #[serde(with = "duration_str", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            upload_timeout: default_upload_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Per-platform overrides of the global retry and polling settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformTuning {
    pub max_retries: Option<u32>,
    #[serde(with = "option_duration_str", default)]
    pub initial_backoff: Option<Duration>,
    #[serde(with = "option_duration_str", default)]
    pub max_backoff: Option<Duration>,
    #[serde(with = "option_duration_str", default)]
    pub poll_interval: Option<Duration>,
    #[serde(with = "option_duration_str", default)]
    pub poll_budget: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstagramConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub user_id: String,
    #[serde(default = "default_ig_token_env")]
    pub token_env: String,
    #[serde(default = "default_caption_template")]
    pub caption_template: String,
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
    #[serde(default)]
    pub tuning: PlatformTuning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacebookConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub page_id: String,
    #[serde(default = "default_fb_token_env")]
    pub token_env: String,
    #[serde(default = "default_caption_template")]
    pub description_template: String,
    #[serde(default = "default_graph_video_url")]
    pub graph_video_url: String,
    #[serde(default)]
    pub tuning: PlatformTuning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YouTubeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_yt_token_env")]
    pub token_env: String,
    #[serde(default = "default_title_template")]
    pub title_template: String,
    #[serde(default = "default_caption_template")]
    pub description_template: String,
    #[serde(default = "default_category_id")]
    pub category_id: String,
    #[serde(default = "default_privacy_status")]
    pub privacy_status: String,
    #[serde(default = "default_youtube_upload_url")]
    pub upload_url: String,
    #[serde(default)]
    pub tuning: PlatformTuning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_x_token_env")]
    pub token_env: String,
    #[serde(default = "default_caption_template")]
    pub text_template: String,
    #[serde(default = "default_x_upload_url")]
    pub upload_url: String,
    #[serde(default = "default_x_api_url")]
    pub api_url: String,
    #[serde(default = "default_x_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub tuning: PlatformTuning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TikTokConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tiktok_token_env")]
    pub token_env: String,
    #[serde(default = "default_caption_template")]
    pub caption_template: String,
    #[serde(default = "default_tiktok_api_url")]
    pub api_url: String,
    /// One of the creator's allowed levels, e.g. PUBLIC_TO_EVERYONE or SELF_ONLY
    #[serde(default = "default_tiktok_privacy_level")]
    pub privacy_level: String,
    #[serde(default = "default_tiktok_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub tuning: PlatformTuning,
}

/// Whether a platform can publish in this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformStatus {
    Enabled,
    /// Not configured, or `enabled = false`
    Disabled,
    /// Configured and enabled, but its token variable is unset
    MissingToken(String),
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load and validate configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything a run relies on before any publishing starts
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        validate_slot_table(&self.slots)?;
        self.schedule.offset()?;

        if self.source.root.trim().is_empty() {
            return Err(ConfigError::MissingField("source.root".to_string()));
        }
        if let Some(base) = &self.source.public_base_url {
            reqwest::Url::parse(base).map_err(|e| {
                ConfigError::Invalid(format!("source.public_base_url '{}': {}", base, e))
            })?;
        }

        if self.retry.multiplier == 0 {
            return Err(ConfigError::Invalid("retry.multiplier must be at least 1".to_string()));
        }

        for platform in PlatformKind::ALL {
            if self.platform_configured(platform) {
                let poll = self.poll_settings_for(platform);
                if poll.interval.is_zero() || poll.interval >= poll.budget {
                    return Err(ConfigError::Invalid(format!(
                        "{}: poll interval ({}) must be non-zero and shorter than the poll budget ({})",
                        platform,
                        humantime::format_duration(poll.interval),
                        humantime::format_duration(poll.budget)
                    )));
                }
            }
        }

        if let Some(ig) = &self.instagram {
            require_non_empty(&ig.user_id, "instagram.user_id")?;
            check_template(&ig.caption_template, "instagram.caption_template")?;
            if self.source.public_base_url.is_none() && ig.enabled {
                return Err(ConfigError::MissingField(
                    "source.public_base_url (Instagram pulls videos by URL)".to_string(),
                ));
            }
        }
        if let Some(fb) = &self.facebook {
            require_non_empty(&fb.page_id, "facebook.page_id")?;
            check_template(&fb.description_template, "facebook.description_template")?;
        }
        if let Some(yt) = &self.youtube {
            check_template(&yt.title_template, "youtube.title_template")?;
            check_template(&yt.description_template, "youtube.description_template")?;
            require_non_empty(&yt.category_id, "youtube.category_id")?;
        }
        if let Some(x) = &self.x {
            check_template(&x.text_template, "x.text_template")?;
            if x.chunk_size == 0 {
                return Err(ConfigError::Invalid("x.chunk_size must be positive".to_string()));
            }
        }
        if let Some(tt) = &self.tiktok {
            check_template(&tt.caption_template, "tiktok.caption_template")?;
            require_non_empty(&tt.privacy_level, "tiktok.privacy_level")?;
            if tt.chunk_size == 0 {
                return Err(ConfigError::Invalid("tiktok.chunk_size must be positive".to_string()));
            }
        }

        Ok(())
    }

    fn platform_configured(&self, platform: PlatformKind) -> bool {
        match platform {
            PlatformKind::Instagram => self.instagram.is_some(),
            PlatformKind::Facebook => self.facebook.is_some(),
            PlatformKind::YouTube => self.youtube.is_some(),
            PlatformKind::X => self.x.is_some(),
            PlatformKind::TikTok => self.tiktok.is_some(),
        }
    }

    fn tuning(&self, platform: PlatformKind) -> Option<&PlatformTuning> {
        match platform {
            PlatformKind::Instagram => self.instagram.as_ref().map(|c| &c.tuning),
            PlatformKind::Facebook => self.facebook.as_ref().map(|c| &c.tuning),
            PlatformKind::YouTube => self.youtube.as_ref().map(|c| &c.tuning),
            PlatformKind::X => self.x.as_ref().map(|c| &c.tuning),
            PlatformKind::TikTok => self.tiktok.as_ref().map(|c| &c.tuning),
        }
    }

    fn enabled_flag_and_token_env(&self, platform: PlatformKind) -> Option<(bool, &str)> {
        match platform {
            PlatformKind::Instagram => self.instagram.as_ref().map(|c| (c.enabled, c.token_env.as_str())),
            PlatformKind::Facebook => self.facebook.as_ref().map(|c| (c.enabled, c.token_env.as_str())),
            PlatformKind::YouTube => self.youtube.as_ref().map(|c| (c.enabled, c.token_env.as_str())),
            PlatformKind::X => self.x.as_ref().map(|c| (c.enabled, c.token_env.as_str())),
            PlatformKind::TikTok => self.tiktok.as_ref().map(|c| (c.enabled, c.token_env.as_str())),
        }
    }

    /// Retry settings for a platform, global values overridden by its tuning
    pub fn retry_settings_for(&self, platform: PlatformKind) -> RetrySettings {
        let mut settings = self.retry.clone();
        if let Some(tuning) = self.tuning(platform) {
            if let Some(max_retries) = tuning.max_retries {
                settings.max_retries = max_retries;
            }
            if let Some(initial) = tuning.initial_backoff {
                settings.initial_backoff = initial;
            }
            if let Some(max) = tuning.max_backoff {
                settings.max_backoff = max;
            }
        }
        settings
    }

    /// Poll settings for a platform, global values overridden by its tuning
    pub fn poll_settings_for(&self, platform: PlatformKind) -> PollSettings {
        let mut settings = self.polling;
        if let Some(tuning) = self.tuning(platform) {
            if let Some(interval) = tuning.poll_interval {
                settings.interval = interval;
            }
            if let Some(budget) = tuning.poll_budget {
                settings.budget = budget;
            }
        }
        settings
    }

    /// Enablement of one platform, reading its token variable from the environment
    pub fn platform_status(&self, platform: PlatformKind) -> PlatformStatus {
        match self.enabled_flag_and_token_env(platform) {
            None | Some((false, _)) => PlatformStatus::Disabled,
            Some((true, token_env)) => match read_token(token_env) {
                Some(_) => PlatformStatus::Enabled,
                None => PlatformStatus::MissingToken(token_env.to_string()),
            },
        }
    }

    /// Token for an enabled platform
    pub fn token_for(&self, platform: PlatformKind) -> Option<SecretString> {
        match self.enabled_flag_and_token_env(platform) {
            Some((true, token_env)) => read_token(token_env),
            _ => None,
        }
    }
}

/// Validate a slot table's shape
///
/// # Errors
///
/// Returns `ConfigError` if the table is empty, an id is blank or repeated,
/// or a slot targets no platform or the same platform twice.
pub fn validate_slot_table(slots: &[Slot]) -> std::result::Result<(), ConfigError> {
    if slots.is_empty() {
        return Err(ConfigError::Invalid("slot table is empty".to_string()));
    }

    let mut seen = HashSet::new();
    for slot in slots {
        if slot.id.trim().is_empty() {
            return Err(ConfigError::Invalid("slot id cannot be empty".to_string()));
        }
        if !seen.insert(slot.id.as_str()) {
            return Err(ConfigError::Invalid(format!("duplicate slot id '{}'", slot.id)));
        }
        if slot.platforms.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "slot '{}' targets no platforms",
                slot.id
            )));
        }
        let mut platforms = HashSet::new();
        for platform in &slot.platforms {
            if !platforms.insert(platform) {
                return Err(ConfigError::Invalid(format!(
                    "slot '{}' lists {} more than once",
                    slot.id, platform
                )));
            }
        }
    }

    Ok(())
}

fn require_non_empty(value: &str, field: &str) -> std::result::Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(field.to_string()));
    }
    Ok(())
}

fn check_template(template: &str, field: &str) -> std::result::Result<(), ConfigError> {
    if template.trim().is_empty() {
        return Err(ConfigError::MissingField(field.to_string()));
    }
    template::check(template).map_err(|e| ConfigError::Invalid(format!("{}: {}", field, e)))
}

/// Read an access token from the named environment variable
pub fn read_token(token_env: &str) -> Option<SecretString> {
    std::env::var(token_env)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(SecretString::from)
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SLOTCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("slotcast").join("config.toml"))
}

fn default_true() -> bool {
    true
}

fn default_tolerance() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_utc_offset() -> String {
    "+00:00".to_string()
}

fn default_ledger_path() -> String {
    "~/.local/share/slotcast/ledger.db".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> u32 {
    2
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_poll_budget() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_upload_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_caption_template() -> String {
    "{caption}".to_string()
}

fn default_title_template() -> String {
    "{title}".to_string()
}

fn default_ig_token_env() -> String {
    "IG_ACCESS_TOKEN".to_string()
}

fn default_fb_token_env() -> String {
    "META_ACCESS_TOKEN".to_string()
}

fn default_yt_token_env() -> String {
    "YT_ACCESS_TOKEN".to_string()
}

fn default_x_token_env() -> String {
    "X_ACCESS_TOKEN".to_string()
}

fn default_tiktok_token_env() -> String {
    "TIKTOK_ACCESS_TOKEN".to_string()
}

fn default_graph_url() -> String {
    "https://graph.facebook.com/v18.0".to_string()
}

fn default_graph_video_url() -> String {
    "https://graph-video.facebook.com/v18.0".to_string()
}

fn default_category_id() -> String {
    // Entertainment
    "24".to_string()
}

fn default_privacy_status() -> String {
    "public".to_string()
}

fn default_youtube_upload_url() -> String {
    "https://www.googleapis.com/upload/youtube/v3/videos".to_string()
}

fn default_x_upload_url() -> String {
    "https://upload.twitter.com/1.1/media/upload.json".to_string()
}

fn default_x_api_url() -> String {
    "https://api.twitter.com/2".to_string()
}

fn default_x_chunk_size() -> usize {
    4 * 1024 * 1024
}

fn default_tiktok_api_url() -> String {
    "https://open.tiktokapis.com/v2".to_string()
}

fn default_tiktok_privacy_level() -> String {
    "SELF_ONLY".to_string()
}

fn default_tiktok_chunk_size() -> usize {
    10 * 1024 * 1024
}

/// Serde adapter for human-readable durations ("10s", "15m")
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

mod option_duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
