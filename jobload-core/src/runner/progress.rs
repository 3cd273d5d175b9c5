use std::sync::Arc;
use std::time::Duration;

use super::schedule::StageSnapshot;

/// Job counters sampled for live display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobProgress {
    pub submitted: u64,
    pub completed: u64,
    pub partial: u64,
    pub failed: u64,
    pub timeout: u64,
    pub submit_errors: u64,
    pub active_streams: i64,
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based).
    pub tick: u64,
    pub elapsed: Duration,
    pub total_duration: Duration,
    pub stage: Option<StageSnapshot>,
    pub target: f64,
    pub active_vus: u64,
    pub max_vus: u64,
    pub iterations_total: u64,
    pub iterations_per_sec_now: f64,
    pub jobs: Option<JobProgress>,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;
