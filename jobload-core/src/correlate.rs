use std::time::Duration;

use crate::observation::{ObservationSet, TerminalStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Disposition {
    Completed,
    Partial,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub disposition: Disposition,
    /// Expected stages that completed, in expected order.
    pub completed: Vec<String>,
    /// Completed stages that were not expected.
    pub unexpected: Vec<String>,
    pub missing: Vec<String>,
    pub elapsed: Duration,
}

/// Classifies a job from what was observed about it.
///
/// Total and deterministic: every input maps to exactly one disposition.
pub fn classify(expected: &[String], observed: &ObservationSet, had_timeout: bool) -> JobOutcome {
    let (completed, missing): (Vec<String>, Vec<String>) = expected
        .iter()
        .cloned()
        .partition(|stage| observed.is_completed(stage));
    let unexpected: Vec<String> = observed
        .completed_stages()
        .filter(|name| !expected.iter().any(|e| e == name))
        .map(String::from)
        .collect();

    let all_done = if expected.is_empty() {
        observed.terminal == Some(TerminalStatus::Completed)
    } else {
        missing.is_empty()
    };

    let disposition = if all_done {
        Disposition::Completed
    } else if had_timeout {
        Disposition::Timeout
    } else if !completed.is_empty() {
        Disposition::Partial
    } else {
        Disposition::Failed
    };

    JobOutcome {
        disposition,
        completed,
        unexpected,
        missing,
        elapsed: observed.elapsed,
    }
}
