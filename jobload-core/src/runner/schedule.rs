use std::time::Duration;

use crate::config::Stage;

const MAX_RECHECK: Duration = Duration::from_millis(50);
const MIN_RECHECK: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: f64,
}

/// Piecewise-linear VU target over time.
///
/// Stage `i` ramps from the previous stage's target (or `start` for the first
/// stage) to its own target over its duration.
#[derive(Debug, Clone)]
pub struct RampingSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl RampingSchedule {
    pub fn new(start: u64, stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    pub fn peak_target(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .max()
            .unwrap_or(0)
            .max(self.start)
    }

    fn stage_index(&self, elapsed: Duration) -> usize {
        // The first stage whose end is strictly after `elapsed`.
        self.cumulative_ends.partition_point(|end| *end <= elapsed)
    }

    fn bounds(&self, idx: usize) -> (Duration, Duration, u64, u64) {
        let stage_start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        let start_target = if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        };
        (
            stage_start,
            self.cumulative_ends[idx],
            start_target,
            self.stages[idx].target,
        )
    }

    pub fn target_at(&self, elapsed: Duration) -> f64 {
        let Some(last) = self.stages.last() else {
            return self.start as f64;
        };
        if self.is_done(elapsed) {
            return last.target as f64;
        }

        let (stage_start, stage_end, from, to) = self.bounds(self.stage_index(elapsed));
        let stage_duration = stage_end.saturating_sub(stage_start);
        if stage_duration.is_zero() {
            return to as f64;
        }

        let progress =
            elapsed.saturating_sub(stage_start).as_secs_f64() / stage_duration.as_secs_f64();
        from as f64 + (to as f64 - from as f64) * progress
    }

    /// VU `n` (1-based) is active while `n <= target`.
    pub fn active_vus_at(&self, elapsed: Duration) -> u64 {
        self.target_at(elapsed).max(0.0).floor() as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        if self.stages.is_empty() {
            return None;
        }

        let total = self.total_duration();
        let clamped = elapsed.min(total);
        let idx = self.stage_index(clamped).min(self.stages.len() - 1);
        let (stage_start, stage_end, start_target, end_target) = self.bounds(idx);

        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = clamped.saturating_sub(stage_start).min(stage_duration);

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_duration.saturating_sub(stage_elapsed),
            start_target,
            end_target,
            current_target: self.target_at(clamped),
        })
    }

    /// How long the controller may sleep before the active VU count can change.
    pub fn next_recheck_in(&self, elapsed: Duration) -> Duration {
        if self.stages.is_empty() || self.is_done(elapsed) {
            return Duration::ZERO;
        }

        let (stage_start, stage_end, from, to) = self.bounds(self.stage_index(elapsed));
        let until_stage_end = stage_end.saturating_sub(elapsed);
        if from == to {
            return until_stage_end.clamp(MIN_RECHECK, MAX_RECHECK);
        }

        let cur = self.target_at(elapsed);
        // Rising: the next VU joins when the target reaches the next integer.
        // Falling: the highest VU leaves as soon as the target drops below its index.
        let want = if to > from {
            cur.floor() + 1.0
        } else {
            cur.floor()
        };
        let stage_secs = stage_end.saturating_sub(stage_start).as_secs_f64();
        let at = (want - from as f64) / (to as f64 - from as f64) * stage_secs;
        let wait = at - elapsed.saturating_sub(stage_start).as_secs_f64();

        Duration::try_from_secs_f64(wait.max(0.0))
            .unwrap_or(MAX_RECHECK)
            .min(until_stage_end)
            .clamp(MIN_RECHECK, MAX_RECHECK)
    }
}
