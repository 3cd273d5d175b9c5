use std::time::Duration;

use url::Url;

use crate::pipeline::SubmitRequest;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

/// Uniform random pause between iterations of one VU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkTime {
    pub min: Duration,
    pub max: Duration,
}

impl Default for ThinkTime {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub start_vus: u64,
    pub stages: Vec<Stage>,
    pub graceful_ramp_down: Duration,
    pub think_time: ThinkTime,
    /// Pause used instead of the think time after a failed submit.
    pub submit_failure_pause: Duration,
    /// Hard cap on concurrently spawned VUs. Defaults to the peak target.
    pub max_vus: Option<u64>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            start_vus: 0,
            stages: vec![
                Stage {
                    duration: Duration::from_secs(30),
                    target: 50,
                },
                Stage {
                    duration: Duration::from_secs(90),
                    target: 50,
                },
                Stage {
                    duration: Duration::from_secs(30),
                    target: 0,
                },
            ],
            graceful_ramp_down: Duration::from_secs(10),
            think_time: ThinkTime::default(),
            submit_failure_pause: Duration::from_secs(2),
            max_vus: None,
        }
    }
}

impl ScenarioConfig {
    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |acc, st| acc.saturating_add(st.duration))
    }

    pub fn peak_target(&self) -> u64 {
        self.stages
            .iter()
            .map(|st| st.target)
            .max()
            .unwrap_or(0)
            .max(self.start_vus)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() || self.total_duration().is_zero() {
            return Err(Error::InvalidStages);
        }
        if self.peak_target() == 0 {
            return Err(Error::InvalidVus);
        }
        if self.max_vus == Some(0) {
            return Err(Error::InvalidMaxVus);
        }
        if self.think_time.min > self.think_time.max {
            return Err(Error::InvalidThinkTime {
                min: self.think_time.min,
                max: self.think_time.max,
            });
        }
        Ok(())
    }
}

/// How a submitted job is followed to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ObservationStrategy {
    #[default]
    Stream,
    Poll,
    /// Stream first; poll the result endpoint when the stream cannot be used.
    StreamThenPoll,
}

/// How per-stage durations are derived from stream events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum StageTiming {
    /// `completed - started` of the same stage.
    Paired,
    /// Gap since the previous stage completed.
    Successive,
    /// `Paired` when a `started` event exists, `Successive` otherwise.
    #[default]
    PairedWithFallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Auth {
    #[default]
    None,
    Bearer(String),
    Cookie {
        name: String,
        value: String,
    },
}

impl Auth {
    /// Header to attach to every request, if any.
    pub fn header(&self) -> Option<(&'static str, String)> {
        match self {
            Self::None => None,
            Self::Bearer(token) => Some(("authorization", format!("Bearer {token}"))),
            Self::Cookie { name, value } => Some(("cookie", format!("{name}={value}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub base_url: Url,
    pub submit_path: String,
    /// Used when the submit response carries no `stream_url`.
    pub stream_path: String,
    /// Used when the submit response carries no `result_url`; the job id is appended.
    pub result_path: String,
    pub auth: Auth,
    pub payload: SubmitRequest,
    pub idempotency_keys: bool,
    pub request_timeout: Duration,
    pub stream_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub strategy: ObservationStrategy,
    pub timing: StageTiming,
    pub expected_stages: Vec<String>,
    /// Stage whose payload carries the reward; `None` disables reward accounting.
    pub reward_stage: Option<String>,
    /// GET the result endpoint after a stream completes.
    pub fetch_result: bool,
    pub result_settle: Duration,
    /// Checked once before the first stage when set.
    pub health_path: Option<String>,
    /// Abort the run when the health check fails instead of only warning.
    pub health_fatal: bool,
}

impl PipelineConfig {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|error| Error::InvalidBaseUrl {
            url: base_url.to_string(),
            error,
        })?;

        Ok(Self {
            base_url,
            submit_path: "/api/v1/scan".to_string(),
            stream_path: "/api/v1/stream".to_string(),
            result_path: "/api/v1/scan/result".to_string(),
            auth: Auth::None,
            payload: SubmitRequest::default(),
            idempotency_keys: false,
            request_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(2500),
            poll_max_attempts: 30,
            strategy: ObservationStrategy::default(),
            timing: StageTiming::default(),
            expected_stages: ["vision", "rule", "answer", "reward"]
                .into_iter()
                .map(String::from)
                .collect(),
            reward_stage: Some("reward".to_string()),
            fetch_result: false,
            result_settle: Duration::from_millis(500),
            health_path: None,
            health_fatal: false,
        })
    }

    /// Resolves a path or absolute URL against `base_url`.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|error| Error::InvalidEndpoint {
            path: path.to_string(),
            error,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.endpoint(&self.submit_path)?;
        self.endpoint(&self.stream_path)?;
        self.endpoint(&self.result_path)?;
        if let Some(path) = &self.health_path {
            self.endpoint(path)?;
        }
        if self.poll_max_attempts == 0 {
            return Err(Error::InvalidPollAttempts);
        }
        if self.request_timeout.is_zero() {
            return Err(Error::InvalidTimeout("request_timeout"));
        }
        if self.stream_timeout.is_zero() {
            return Err(Error::InvalidTimeout("stream_timeout"));
        }
        Ok(())
    }
}
