use std::sync::Arc;
use std::time::Instant;

use crate::clock::Clock;
use crate::config::ObservationStrategy;
use crate::correlate::{Disposition, JobOutcome, classify};
use crate::observation::{ObservationSet, TerminalStatus};
use crate::pipeline::{JobHandle, PipelineClient, PollError, StreamError};

/// Identity of one iteration, threaded through submit, observe and classify.
#[derive(Debug, Clone)]
pub struct IterationContext {
    /// 1-based.
    pub vu_id: u64,
    /// 0-based, per VU.
    pub iteration: u64,
    pub started_at: Instant,
    pub idempotency_key: String,
}

impl IterationContext {
    pub fn new(vu_id: u64, iteration: u64, clock: &dyn Clock) -> Self {
        Self {
            vu_id,
            iteration,
            started_at: clock.now(),
            idempotency_key: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// How an iteration ended, as far as the scheduler cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationEnd {
    Finished,
    SubmitFailed,
}

#[derive(Debug, Clone)]
pub struct IterationReport {
    pub job_id: Option<String>,
    pub outcome: Option<JobOutcome>,
}

impl IterationReport {
    pub fn end(&self) -> IterationEnd {
        if self.job_id.is_some() {
            IterationEnd::Finished
        } else {
            IterationEnd::SubmitFailed
        }
    }
}

/// One full job lifecycle per iteration: submit, observe, classify, record.
#[derive(Debug, Clone)]
pub struct Workload {
    client: Arc<PipelineClient>,
}

impl Workload {
    pub fn new(client: PipelineClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    pub fn client(&self) -> &PipelineClient {
        &self.client
    }

    pub async fn run_iteration(&self, ctx: &IterationContext) -> IterationReport {
        let job = match self.client.submit(&ctx.idempotency_key).await {
            Ok(job) => job,
            Err(err) => {
                tracing::warn!(
                    vu = ctx.vu_id,
                    iteration = ctx.iteration,
                    kind = ?err.transport_kind(),
                    %err,
                    "submit failed"
                );
                return IterationReport {
                    job_id: None,
                    outcome: None,
                };
            }
        };
        tracing::debug!(vu = ctx.vu_id, job_id = %job.job_id, "job submitted");
        self.follow(ctx, job).await
    }

    /// Observes an already submitted job, then classifies and records it.
    ///
    /// The pipeline duration runs from `job.submitted_at` to the outcome on the
    /// client's clock.
    pub async fn follow(&self, ctx: &IterationContext, job: JobHandle) -> IterationReport {
        let cfg = self.client.config();
        let (observed, had_timeout) = self.observe(&job).await;
        let outcome = classify(&cfg.expected_stages, &observed, had_timeout);

        let metrics = self.client.metrics();
        metrics.record_observation(&observed);
        metrics.record_outcome(&outcome, self.client.clock().now() - job.submitted_at);

        if outcome.disposition == Disposition::Completed {
            if let Some(reward_stage) = cfg.reward_stage.as_deref() {
                metrics.record_reward(has_reward(&observed, reward_stage));
            }
            if cfg.fetch_result && cfg.strategy != ObservationStrategy::Poll {
                self.client.fetch_result(&job).await;
            }
        } else {
            tracing::debug!(
                vu = ctx.vu_id,
                job_id = %job.job_id,
                disposition = %outcome.disposition,
                missing = ?outcome.missing,
                "job did not complete"
            );
        }

        IterationReport {
            job_id: Some(job.job_id),
            outcome: Some(outcome),
        }
    }

    /// Returns what was observed and whether gathering hit its deadline.
    async fn observe(&self, job: &JobHandle) -> (ObservationSet, bool) {
        let cfg = self.client.config();
        match cfg.strategy {
            ObservationStrategy::Stream => self.stream(job).await.unwrap_or_else(|set| (set, false)),
            ObservationStrategy::Poll => self.poll(job).await,
            ObservationStrategy::StreamThenPoll => match self.stream(job).await {
                Ok(observed) => observed,
                Err(_) => {
                    tracing::debug!(job_id = %job.job_id, "stream unusable, falling back to polling");
                    self.poll(job).await
                }
            },
        }
    }

    /// `Err` means the stream could not be used at all; it carries an empty set.
    async fn stream(&self, job: &JobHandle) -> Result<(ObservationSet, bool), ObservationSet> {
        let cfg = self.client.config();
        match self.client.subscribe(job, cfg.stream_timeout).await {
            Ok(observed) => Ok((observed, false)),
            Err(StreamError::Timeout { partial, .. }) => Ok((*partial, true)),
            Err(err) => {
                tracing::warn!(job_id = %job.job_id, kind = ?err.transport_kind(), %err, "stream failed");
                Err(ObservationSet::default())
            }
        }
    }

    async fn poll(&self, job: &JobHandle) -> (ObservationSet, bool) {
        let cfg = self.client.config();
        match self
            .client
            .poll(job, cfg.poll_interval, cfg.poll_max_attempts)
            .await
        {
            Ok(observed) => (observed, false),
            Err(PollError::Exhausted { attempts }) => {
                tracing::debug!(job_id = %job.job_id, attempts, "polling exhausted");
                (ObservationSet::default(), true)
            }
            Err(err) => {
                tracing::debug!(job_id = %job.job_id, %err, "polling ended without result");
                let observed = ObservationSet {
                    terminal: matches!(err, PollError::JobFailed { .. })
                        .then_some(TerminalStatus::Failed),
                    ..ObservationSet::default()
                };
                (observed, false)
            }
        }
    }
}

fn has_reward(observed: &ObservationSet, reward_stage: &str) -> bool {
    observed
        .record(reward_stage)
        .and_then(|r| r.payload.as_ref())
        .and_then(|p| p.get("reward"))
        .is_some_and(|r| !r.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{StageRecord, StageStatus};

    fn with_reward_payload(payload: Option<serde_json::Value>) -> ObservationSet {
        ObservationSet {
            records: vec![StageRecord {
                status: StageStatus::Completed,
                payload,
                ..StageRecord::pending("reward")
            }],
            ..ObservationSet::default()
        }
    }

    #[test]
    fn reward_presence_requires_non_null_reward() {
        let present = with_reward_payload(Some(serde_json::json!({"reward": {"name": "sprout"}})));
        assert!(has_reward(&present, "reward"));

        let null = with_reward_payload(Some(serde_json::json!({"reward": null})));
        assert!(!has_reward(&null, "reward"));

        assert!(!has_reward(&with_reward_payload(None), "reward"));
        assert!(!has_reward(&ObservationSet::default(), "reward"));
    }

    #[test]
    fn report_without_job_is_a_submit_failure() {
        let report = IterationReport {
            job_id: None,
            outcome: None,
        };
        assert_eq!(report.end(), IterationEnd::SubmitFailed);
    }

    #[test]
    fn iteration_contexts_get_distinct_idempotency_keys() {
        let clock = crate::clock::ManualClock::new(1_700_000_000.0);
        let a = IterationContext::new(1, 0, &clock);
        clock.advance(std::time::Duration::from_millis(40));
        let b = IterationContext::new(1, 1, &clock);
        assert_ne!(a.idempotency_key, b.idempotency_key);
        assert_eq!(b.started_at - a.started_at, std::time::Duration::from_millis(40));
    }
}
