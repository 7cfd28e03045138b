//! Slotcast - daily video posting to Instagram, Facebook, YouTube, X and TikTok
//!
//! A run picks the slots that are due, resolves each slot's video once and
//! publishes it to every platform the slot targets, with bounded retries
//! per platform. The result is a per-slot summary and an exit code.

pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod platforms;
pub mod retry;
pub mod scheduling;
pub mod source;
pub mod summary;
pub mod template;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{PublishError, Result, SlotcastError};
pub use ledger::Ledger;
pub use orchestrator::{Orchestrator, PlatformPolicy, RunReport};
pub use platforms::Publisher;
pub use retry::{BackoffSchedule, RetryPolicy};
pub use source::{DirectorySource, Resolution, SourceResolver};
pub use summary::RunSummary;
pub use types::{ContentType, OutcomeStatus, PlatformKind, Slot, SlotOutcome, VideoArtifact};
