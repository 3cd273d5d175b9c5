use std::sync::Arc;
use std::time::Duration;

use jobload_metrics::{MetricHandle, MetricKind, Registry};

use crate::Result;
use crate::correlate::{Disposition, JobOutcome};
use crate::observation::ObservationSet;

/// Handles for every series written while driving jobs, resolved once per run.
#[derive(Debug, Clone)]
pub struct JobMetrics {
    registry: Arc<Registry>,

    pub jobs_submitted: MetricHandle,
    pub submit_errors: MetricHandle,
    pub submit_success_rate: MetricHandle,
    pub submit_duration: MetricHandle,

    pub stream_connected: MetricHandle,
    pub stream_errors: MetricHandle,
    pub stream_ttfb: MetricHandle,
    pub stream_duration: MetricHandle,
    pub stream_events: MetricHandle,
    pub stream_duplicate_events: MetricHandle,
    pub stream_discarded_lines: MetricHandle,
    pub active_streams: MetricHandle,

    pub poll_requests: MetricHandle,
    pub poll_errors: MetricHandle,
    pub poll_duration: MetricHandle,

    pub jobs_completed: MetricHandle,
    pub jobs_partial: MetricHandle,
    pub jobs_failed: MetricHandle,
    pub jobs_timeout: MetricHandle,
    pub completion_rate: MetricHandle,
    pub pipeline_duration: MetricHandle,
    pub time_to_first_event: MetricHandle,

    pub reward_rate: MetricHandle,
    pub rewards_missing: MetricHandle,

    pub result_duration: MetricHandle,
    pub result_errors: MetricHandle,
}

impl JobMetrics {
    pub fn register(registry: Arc<Registry>) -> Result<Self> {
        let counter = |name: &str| registry.handle_for(name, MetricKind::Counter);
        let trend = |name: &str| registry.handle_for(name, MetricKind::Trend);
        let rate = |name: &str| registry.handle_for(name, MetricKind::Rate);

        Ok(Self {
            jobs_submitted: counter("jobs_submitted")?,
            submit_errors: counter("submit_errors")?,
            submit_success_rate: rate("submit_success_rate")?,
            submit_duration: trend("submit_duration")?,

            stream_connected: counter("stream_connected")?,
            stream_errors: counter("stream_errors")?,
            stream_ttfb: trend("stream_ttfb")?,
            stream_duration: trend("stream_duration")?,
            stream_events: counter("stream_events")?,
            stream_duplicate_events: counter("stream_duplicate_events")?,
            stream_discarded_lines: counter("stream_discarded_lines")?,
            active_streams: registry.handle_for("active_streams", MetricKind::Gauge)?,

            poll_requests: counter("poll_requests")?,
            poll_errors: counter("poll_errors")?,
            poll_duration: trend("poll_duration")?,

            jobs_completed: counter("jobs_completed")?,
            jobs_partial: counter("jobs_partial")?,
            jobs_failed: counter("jobs_failed")?,
            jobs_timeout: counter("jobs_timeout")?,
            completion_rate: rate("completion_rate")?,
            pipeline_duration: trend("pipeline_duration")?,
            time_to_first_event: trend("time_to_first_event")?,

            reward_rate: rate("reward_rate")?,
            rewards_missing: counter("rewards_missing")?,

            result_duration: trend("result_duration")?,
            result_errors: counter("result_errors")?,

            registry,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Per-stage trend, created on first reference.
    pub fn stage_duration(&self, stage: &str) -> Option<MetricHandle> {
        let name = format!("stage_{stage}_duration");
        match self.registry.handle_for(&name, MetricKind::Trend) {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(%err, "skipping stage duration");
                None
            }
        }
    }

    pub fn record_observation(&self, observed: &ObservationSet) {
        self.stream_events.increment(observed.events_total);
        self.stream_duplicate_events.increment(observed.duplicates);
        self.stream_discarded_lines.increment(observed.discarded_lines);
        if let Some(ttfe) = observed.time_to_first_event {
            self.time_to_first_event.observe_duration(ttfe);
        }
        for record in observed.records.iter().filter(|r| r.is_completed()) {
            if let Some(d) = record.duration
                && let Some(h) = self.stage_duration(&record.name)
            {
                h.observe_duration(d);
            }
        }
    }

    /// `pipeline` is submit-to-outcome; it is only recorded for completed jobs.
    pub fn record_outcome(&self, outcome: &JobOutcome, pipeline: Duration) {
        let handle = match outcome.disposition {
            Disposition::Completed => &self.jobs_completed,
            Disposition::Partial => &self.jobs_partial,
            Disposition::Failed => &self.jobs_failed,
            Disposition::Timeout => &self.jobs_timeout,
        };
        handle.increment(1);

        let completed = outcome.disposition == Disposition::Completed;
        self.completion_rate.record_rate(completed);
        if completed {
            self.pipeline_duration.observe_duration(pipeline);
        }
    }

    pub fn record_reward(&self, present: bool) {
        self.reward_rate.record_rate(present);
        if !present {
            self.rewards_missing.increment(1);
        }
    }
}

/// Series owned by the scheduler.
#[derive(Debug, Clone)]
pub struct VuMetrics {
    pub vus: MetricHandle,
    pub vus_max: MetricHandle,
    pub vus_spawn_failed: MetricHandle,
    pub iterations_total: MetricHandle,
    pub iterations_interrupted: MetricHandle,
    pub iteration_duration: MetricHandle,
}

impl VuMetrics {
    pub fn register(registry: &Registry) -> Result<Self> {
        Ok(Self {
            vus: registry.handle_for("vus", MetricKind::Gauge)?,
            vus_max: registry.handle_for("vus_max", MetricKind::Gauge)?,
            vus_spawn_failed: registry.handle_for("vus_spawn_failed", MetricKind::Counter)?,
            iterations_total: registry.handle_for("iterations_total", MetricKind::Counter)?,
            iterations_interrupted: registry
                .handle_for("iterations_interrupted", MetricKind::Counter)?,
            iteration_duration: registry.handle_for("iteration_duration", MetricKind::Trend)?,
        })
    }

    pub fn record_iteration(&self, duration: Duration) {
        self.iterations_total.increment(1);
        self.iteration_duration.observe_duration(duration);
    }

    /// Marks one VU live for as long as the guard is held.
    pub fn enter_active_vu(&self) -> ActiveVuGuard {
        self.vus.increment_gauge(1);
        self.vus_max.raise_gauge(self.vus.get_gauge());
        ActiveVuGuard {
            vus: self.vus.clone(),
        }
    }
}

pub struct ActiveVuGuard {
    vus: MetricHandle,
}

impl Drop for ActiveVuGuard {
    fn drop(&mut self) {
        self.vus.decrement_gauge(1);
    }
}
