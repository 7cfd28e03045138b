//! Slot selection
//!
//! Decides which slots of the table are due at a given instant. Slot times
//! are local times of day in the configured offset; distance between two
//! times wraps around midnight, so 23:58 and 00:03 are five minutes apart.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Timelike, Utc};

use crate::config::validate_slot_table;
use crate::error::ConfigError;
use crate::types::Slot;

const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// Circular distance between two times of day
pub fn time_of_day_distance(a: NaiveTime, b: NaiveTime) -> Duration {
    let a = a.num_seconds_from_midnight();
    let b = b.num_seconds_from_midnight();
    let direct = a.abs_diff(b);
    Duration::from_secs(u64::from(direct.min(SECONDS_PER_DAY - direct)))
}

/// Express a UTC instant in the schedule's offset
pub fn localize(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<FixedOffset> {
    offset.from_utc_datetime(&now.naive_utc())
}

/// Slots due at `now`, in declaration order
///
/// A slot is due when its scheduled time is within `tolerance` of `now`'s
/// time of day and its id is not in `already_ran`.
///
/// # Errors
///
/// Returns `ConfigError` when the table is empty or malformed.
pub fn due_slots(
    now: DateTime<FixedOffset>,
    table: &[Slot],
    tolerance: Duration,
    already_ran: &HashSet<String>,
) -> Result<Vec<Slot>, ConfigError> {
    validate_slot_table(table)?;

    let time = now.time();
    let due = table
        .iter()
        .filter(|slot| time_of_day_distance(time, slot.scheduled) <= tolerance)
        .filter(|slot| {
            let ran = already_ran.contains(&slot.id);
            if ran {
                tracing::debug!(slot = %slot.id, "Slot already ran today, not due");
            }
            !ran
        })
        .cloned()
        .collect();

    Ok(due)
}

/// Slots picked by name regardless of time, in declaration order
///
/// # Errors
///
/// Returns `ConfigError` for a malformed table or a name that matches no slot.
pub fn select_named(table: &[Slot], names: &[String]) -> Result<Vec<Slot>, ConfigError> {
    validate_slot_table(table)?;

    let wanted: HashSet<&str> = names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()).collect();
    if let Some(unknown) = wanted.iter().find(|name| !table.iter().any(|s| s.id == **name)) {
        let known: Vec<&str> = table.iter().map(|s| s.id.as_str()).collect();
        return Err(ConfigError::Invalid(format!(
            "unknown slot '{}'. Known slots: {}",
            unknown,
            known.join(", ")
        )));
    }

    Ok(table
        .iter()
        .filter(|slot| wanted.contains(slot.id.as_str()))
        .cloned()
        .collect())
}
