//! Per-run result summary

use serde::Serialize;

use crate::types::{OutcomeStatus, SlotOutcome};

/// Outcome counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SummaryCounts {
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Ordered outcomes of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    outcomes: Vec<SlotOutcome>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: SlotOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[SlotOutcome] {
        &self.outcomes
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Outcomes of one slot, in recording order
    pub fn for_slot<'a>(&'a self, slot_id: &'a str) -> impl Iterator<Item = &'a SlotOutcome> + 'a {
        self.outcomes.iter().filter(move |o| o.slot_id == slot_id)
    }

    /// Slot ids in first-recorded order
    pub fn slot_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for outcome in &self.outcomes {
            if !ids.contains(&outcome.slot_id.as_str()) {
                ids.push(&outcome.slot_id);
            }
        }
        ids
    }

    pub fn counts(&self) -> SummaryCounts {
        let mut counts = SummaryCounts::default();
        for outcome in &self.outcomes {
            match outcome.status {
                OutcomeStatus::Success => counts.success += 1,
                OutcomeStatus::Skipped => counts.skipped += 1,
                OutcomeStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.status == OutcomeStatus::Failed)
    }

    /// 0 when nothing failed, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }

    /// One line per slot, e.g.
    /// `reel_9am: youtube=SUCCESS, instagram=FAILED (IG timeout, 4 attempts: ...)`
    pub fn render(&self) -> String {
        if self.outcomes.is_empty() {
            return "no slots due".to_string();
        }

        self.slot_ids()
            .into_iter()
            .map(|slot_id| {
                let entries: Vec<String> = self.for_slot(slot_id).map(render_outcome).collect();
                format!("{}: {}", slot_id, entries.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

fn render_outcome(outcome: &SlotOutcome) -> String {
    let head = format!("{}={}", outcome.platform, outcome.status);
    match outcome.status {
        OutcomeStatus::Success => head,
        OutcomeStatus::Skipped => match &outcome.reason {
            Some(reason) => format!("{} ({})", head, reason),
            None => head,
        },
        OutcomeStatus::Failed => {
            let reason = outcome.reason.as_deref().unwrap_or("failed");
            let attempts = match outcome.attempts {
                1 => "1 attempt".to_string(),
                n => format!("{} attempts", n),
            };
            match &outcome.detail {
                Some(detail) => format!("{} ({}, {}: {})", head, reason, attempts, detail),
                None => format!("{} ({}, {})", head, reason, attempts),
            }
        }
    }
}
