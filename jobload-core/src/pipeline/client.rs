use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use jobload_http::{HttpClient, HttpRequest};
use url::Url;

use super::{
    HealthError, JobHandle, JobStatus, PollError, ResultResponse, StreamError, SubmitError,
    SubmitResponse,
};
use crate::clock::SharedClock;
use crate::config::PipelineConfig;
use crate::events::{LineAccumulator, parse_events};
use crate::job_metrics::JobMetrics;
use crate::observation::{ObservationSet, StageRecord, StageStatus, TerminalStatus};
use crate::{Error, Result};

const EVENT_STREAM: &str = "text/event-stream";

/// Talks to the job pipeline on behalf of every VU.
///
/// Holds no per-job state; one instance is shared across the run.
#[derive(Debug, Clone)]
pub struct PipelineClient {
    http: HttpClient,
    cfg: Arc<PipelineConfig>,
    clock: SharedClock,
    metrics: JobMetrics,
    submit_url: Url,
    submit_body: Bytes,
}

struct ActiveStreamGuard<'a>(&'a JobMetrics);

impl Drop for ActiveStreamGuard<'_> {
    fn drop(&mut self) {
        self.0.active_streams.decrement_gauge(1);
    }
}

impl PipelineClient {
    pub fn new(
        cfg: Arc<PipelineConfig>,
        http: HttpClient,
        clock: SharedClock,
        metrics: JobMetrics,
    ) -> Result<Self> {
        cfg.validate()?;
        let submit_url = cfg.endpoint(&cfg.submit_path)?;
        let submit_body = Bytes::from(serde_json::to_vec(&cfg.payload).map_err(Error::Payload)?);

        Ok(Self {
            http,
            cfg,
            clock,
            metrics,
            submit_url,
            submit_body,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn metrics(&self) -> &JobMetrics {
        &self.metrics
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    fn authorized(&self, mut req: HttpRequest) -> HttpRequest {
        if let Some((name, value)) = self.cfg.auth.header() {
            req = req.header(name, value);
        }
        req
    }

    /// Creates a job. No retries.
    pub async fn submit(&self, idempotency_key: &str) -> std::result::Result<JobHandle, SubmitError> {
        let mut req = HttpRequest::post_owned(self.submit_url.to_string(), self.submit_body.clone())
            .header("content-type", "application/json")
            .header("accept", "application/json")
            .timeout(self.cfg.request_timeout);
        if self.cfg.idempotency_keys {
            req = req.header("x-idempotency-key", idempotency_key);
        }
        let req = self.authorized(req);

        self.metrics.jobs_submitted.increment(1);
        let started = self.clock.now();
        let res = self.http.request(req).await;
        self.metrics
            .submit_duration
            .observe_duration(self.clock.now() - started);

        let handle = res
            .map_err(SubmitError::from)
            .and_then(|res| self.job_handle(res, started));

        self.metrics.submit_success_rate.record_rate(handle.is_ok());
        if handle.is_err() {
            self.metrics.submit_errors.increment(1);
        }
        handle
    }

    fn job_handle(
        &self,
        res: jobload_http::HttpResponse,
        submitted_at: std::time::Instant,
    ) -> std::result::Result<JobHandle, SubmitError> {
        if !matches!(res.status, 200 | 202) {
            return Err(SubmitError::Status { status: res.status });
        }

        let body: SubmitResponse = serde_json::from_slice(&res.body)
            .map_err(|e| SubmitError::MalformedBody(e.to_string()))?;
        if body.job_id.is_empty() {
            return Err(SubmitError::MalformedBody("empty job_id".to_string()));
        }
        if body.stream_url.is_none() && body.result_url.is_none() {
            return Err(SubmitError::MissingUrls {
                job_id: body.job_id,
            });
        }

        let resolve = |raw: Option<&str>| -> std::result::Result<Option<Url>, SubmitError> {
            raw.map(|u| {
                self.cfg
                    .endpoint(u)
                    .map_err(|e| SubmitError::MalformedBody(e.to_string()))
            })
            .transpose()
        };
        let stream_url = match resolve(body.stream_url.as_deref())? {
            Some(url) => Some(url),
            None => self.fallback_stream_url(&body.job_id),
        };
        let result_url = match resolve(body.result_url.as_deref())? {
            Some(url) => Some(url),
            None => self.fallback_result_url(&body.job_id),
        };

        Ok(JobHandle {
            job_id: body.job_id,
            submitted_at,
            stream_url,
            result_url,
        })
    }

    fn fallback_stream_url(&self, job_id: &str) -> Option<Url> {
        let mut url = self.cfg.endpoint(&self.cfg.stream_path).ok()?;
        url.query_pairs_mut().append_pair("job_id", job_id);
        Some(url)
    }

    fn fallback_result_url(&self, job_id: &str) -> Option<Url> {
        let mut url = self.cfg.endpoint(&self.cfg.result_path).ok()?;
        url.path_segments_mut().ok()?.pop_if_empty().push(job_id);
        Some(url)
    }

    /// Follows the job's event stream until it ends, reports a terminal event,
    /// or `timeout` elapses.
    pub async fn subscribe(
        &self,
        job: &JobHandle,
        timeout: Duration,
    ) -> std::result::Result<ObservationSet, StreamError> {
        let url = job.stream_url.as_ref().ok_or(StreamError::MissingUrl)?;
        let req = self.authorized(
            HttpRequest::get_owned(url.to_string())
                .header("accept", EVENT_STREAM)
                .header("cache-control", "no-cache")
                .header("x-job-id", job.job_id.clone()),
        );

        self.metrics.active_streams.increment_gauge(1);
        let _active = ActiveStreamGuard(&self.metrics);

        let reference = self.clock.unix_time();
        let opened = self.clock.now();
        let mut acc = LineAccumulator::default();
        let mut first_event: Option<Duration> = None;

        let read = tokio::time::timeout(timeout, async {
            let mut stream = self.http.open_stream(req).await?;
            let content_type = stream.header("content-type").map(str::to_string);
            let is_event_stream = content_type
                .as_deref()
                .is_some_and(|ct| ct.to_ascii_lowercase().contains(EVENT_STREAM));
            if !stream.is_success() || !is_event_stream {
                return Err(StreamError::ProtocolMismatch {
                    status: stream.status,
                    content_type,
                });
            }
            self.metrics.stream_connected.increment(1);

            let mut first_byte = true;
            loop {
                let chunk = match stream.next_chunk().await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break,
                    Err(err) => {
                        // Keep what arrived; the correlator decides what it amounts to.
                        tracing::debug!(job_id = %job.job_id, kind = %err.kind(), %err, "stream body ended with error");
                        self.metrics.stream_errors.increment(1);
                        break;
                    }
                };
                if first_byte {
                    first_byte = false;
                    self.metrics
                        .stream_ttfb
                        .observe_duration(self.clock.now() - opened);
                }
                if acc.push(&chunk) > 0 && first_event.is_none() {
                    first_event = Some(self.clock.now() - opened);
                }
                if acc.saw_terminal() {
                    break;
                }
            }
            Ok::<(), StreamError>(())
        })
        .await;

        let elapsed = self.clock.now() - opened;
        self.metrics.stream_duration.observe_duration(elapsed);

        let mut observed = parse_events(&acc.finish(), reference, self.cfg.timing);
        observed.elapsed = elapsed;
        if observed.time_to_first_event.is_none() && observed.events_total > 0 {
            observed.time_to_first_event = first_event;
        }

        match read {
            Ok(Ok(())) => Ok(observed),
            Ok(Err(err)) => {
                self.metrics.stream_errors.increment(1);
                Err(err)
            }
            Err(_) => Err(StreamError::Timeout {
                elapsed,
                partial: Box::new(observed),
            }),
        }
    }

    /// Polls the result endpoint until the job finishes or `max_attempts` is used up.
    ///
    /// `404`, other error statuses, transport failures and unreadable bodies all
    /// count as "not yet" and polling continues.
    pub async fn poll(
        &self,
        job: &JobHandle,
        interval: Duration,
        max_attempts: u32,
    ) -> std::result::Result<ObservationSet, PollError> {
        let url = job.result_url.as_ref().ok_or(PollError::MissingUrl)?;
        let req = self.authorized(
            HttpRequest::get_owned(url.to_string())
                .header("accept", "application/json")
                .timeout(self.cfg.request_timeout),
        );
        let started = self.clock.now();

        for attempt in 1..=max_attempts {
            let sent = self.clock.now();
            let res = self.http.request(req.clone()).await;
            self.metrics.poll_requests.increment(1);
            self.metrics
                .poll_duration
                .observe_duration(self.clock.now() - sent);

            match res {
                Ok(res) if res.status == 404 => {}
                Ok(res) if res.is_success() => match serde_json::from_slice::<ResultResponse>(&res.body) {
                    Ok(body) => match body.status {
                        JobStatus::Completed => {
                            let mut observed = self.completed_observation(&body);
                            observed.elapsed = self.clock.now() - started;
                            return Ok(observed);
                        }
                        JobStatus::Failed => return Err(PollError::JobFailed { attempts: attempt }),
                        _ => {}
                    },
                    Err(err) => {
                        tracing::debug!(job_id = %job.job_id, %err, "unreadable result body");
                        self.metrics.poll_errors.increment(1);
                    }
                },
                Ok(res) => {
                    tracing::debug!(job_id = %job.job_id, status = res.status, "poll error status");
                    self.metrics.poll_errors.increment(1);
                }
                Err(err) => {
                    tracing::debug!(job_id = %job.job_id, kind = %err.kind(), %err, "poll request failed");
                    self.metrics.poll_errors.increment(1);
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        Err(PollError::Exhausted {
            attempts: max_attempts,
        })
    }

    /// A finished job has run every stage, whether or not a reward was granted;
    /// the reward stage carries `{"reward": ...}` (possibly `null`) like a
    /// streamed `completed` event does.
    fn completed_observation(&self, body: &ResultResponse) -> ObservationSet {
        let reward_stage = self.cfg.reward_stage.as_deref();
        let records = self
            .cfg
            .expected_stages
            .iter()
            .map(|stage| StageRecord {
                status: StageStatus::Completed,
                payload: (Some(stage.as_str()) == reward_stage)
                    .then(|| serde_json::json!({ "reward": body.reward_value() })),
                ..StageRecord::pending(stage.clone())
            })
            .collect();

        ObservationSet {
            records,
            terminal: Some(TerminalStatus::Completed),
            ..ObservationSet::default()
        }
    }

    /// Fetches the final result once, after the configured settle delay.
    pub async fn fetch_result(&self, job: &JobHandle) -> bool {
        let Some(url) = job.result_url.as_ref() else {
            return false;
        };
        tokio::time::sleep(self.cfg.result_settle).await;

        let req = self.authorized(
            HttpRequest::get_owned(url.to_string())
                .header("accept", "application/json")
                .timeout(self.cfg.request_timeout),
        );
        let sent = self.clock.now();
        let res = self.http.request(req).await;
        self.metrics
            .result_duration
            .observe_duration(self.clock.now() - sent);

        let ok = match &res {
            Ok(r) => r.is_success(),
            Err(err) => {
                tracing::debug!(job_id = %job.job_id, kind = %err.kind(), %err, "result fetch failed");
                false
            }
        };
        if !ok {
            self.metrics.result_errors.increment(1);
        }
        ok
    }

    /// One GET against `path`; any 2xx is healthy.
    pub async fn check_health(&self, path: &str) -> std::result::Result<Duration, HealthError> {
        let url = self
            .cfg
            .endpoint(path)
            .map_err(|_| jobload_http::Error::InvalidUrl(path.to_string()))?;
        let req = self.authorized(
            HttpRequest::get_owned(url.to_string())
                .header("accept", "application/json")
                .timeout(self.cfg.request_timeout),
        );

        let sent = self.clock.now();
        let res = self.http.request(req).await?;
        let latency = self.clock.now().saturating_duration_since(sent);
        if !res.is_success() {
            return Err(HealthError::Status { status: res.status });
        }
        Ok(latency)
    }
}
