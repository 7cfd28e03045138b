//! Error types for Slotcast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SlotcastError>;

#[derive(Error, Debug)]
pub enum SlotcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SlotcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SlotcastError::Config(_) => 2,
            SlotcastError::InvalidInput(_) => 3,
            SlotcastError::Ledger(_) => 1,
            SlotcastError::Publish(_) => 1,
            SlotcastError::Source(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read source directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to build media URL: {0}")]
    Url(String),

    #[error("Source root not found: {0}")]
    NotFound(String),
}

/// Failure of one publish step.
///
/// The variant decides retry eligibility: `Transient` and `Timeout` are
/// retried by [`crate::retry::RetryPolicy`], everything else ends the
/// (slot, platform) pair on the first occurrence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Permanent failure: {0}")]
    Permanent(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl PublishError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PublishError::Transient(_) | PublishError::Timeout(_))
    }

    /// Short lowercase kind used in outcome reasons ("IG timeout")
    pub fn label(&self) -> &'static str {
        match self {
            PublishError::Validation(_) => "validation",
            PublishError::Transient(_) => "transient",
            PublishError::Permanent(_) => "permanent",
            PublishError::Timeout(_) => "timeout",
            PublishError::Cancelled(_) => "cancelled",
        }
    }

    /// The message without the variant prefix
    pub fn detail(&self) -> &str {
        match self {
            PublishError::Validation(msg)
            | PublishError::Transient(msg)
            | PublishError::Permanent(msg)
            | PublishError::Timeout(msg)
            | PublishError::Cancelled(msg) => msg,
        }
    }
}
