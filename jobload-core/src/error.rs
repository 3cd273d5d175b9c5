pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Metrics(#[from] jobload_metrics::Error),

    #[error("`stages` must be a non-empty list of {{ duration, target }} with a non-zero total duration")]
    InvalidStages,

    #[error("at least one stage (or `start_vus`) must target a positive number of VUs")]
    InvalidVus,

    #[error("`max_vus` must be a positive integer")]
    InvalidMaxVus,

    #[error("think time minimum ({min:?}) must not exceed maximum ({max:?})")]
    InvalidThinkTime {
        min: std::time::Duration,
        max: std::time::Duration,
    },

    #[error("invalid base url `{url}`: {error}")]
    InvalidBaseUrl { url: String, error: url::ParseError },

    #[error("invalid endpoint path `{path}`: {error}")]
    InvalidEndpoint {
        path: String,
        error: url::ParseError,
    },

    #[error("submit payload cannot be encoded: {0}")]
    Payload(serde_json::Error),

    #[error("`poll_max_attempts` must be a positive integer")]
    InvalidPollAttempts,

    #[error("`{0}` must be a positive duration")]
    InvalidTimeout(&'static str),

    #[error("invalid threshold expression for metric `{metric}`: {error}")]
    InvalidThresholdExpr { metric: String, error: String },

    #[error("pre-run health check failed: {0}")]
    HealthCheck(#[from] crate::pipeline::HealthError),
}
