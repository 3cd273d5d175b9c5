use std::time::Duration;

use jobload_http::TransportErrorKind;

use crate::observation::ObservationSet;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("submit returned http {status}")]
    Status { status: u16 },

    #[error("malformed submit response: {0}")]
    MalformedBody(String),

    #[error("submit response for job `{job_id}` carries neither `stream_url` nor `result_url`")]
    MissingUrls { job_id: String },

    #[error(transparent)]
    Transport(#[from] jobload_http::Error),
}

impl SubmitError {
    /// `None` when the server answered, however badly.
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport(err) => Some(err.kind()),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Carries whatever was observed before the deadline.
    #[error("stream timed out after {elapsed:?}")]
    Timeout {
        elapsed: Duration,
        partial: Box<ObservationSet>,
    },

    #[error("stream answered http {status} with content-type {content_type:?}")]
    ProtocolMismatch {
        status: u16,
        content_type: Option<String>,
    },

    #[error("job has no stream url")]
    MissingUrl,

    #[error(transparent)]
    Transport(#[from] jobload_http::Error),
}

impl StreamError {
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Timeout { .. } => Some(TransportErrorKind::Timeout),
            Self::Transport(err) => Some(err.kind()),
            Self::ProtocolMismatch { .. } | Self::MissingUrl => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("job still not finished after {attempts} poll attempts")]
    Exhausted { attempts: u32 },

    #[error("job reported failure after {attempts} poll attempts")]
    JobFailed { attempts: u32 },

    #[error("job has no result url")]
    MissingUrl,
}

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("health endpoint answered http {status}")]
    Status { status: u16 },

    #[error(transparent)]
    Transport(#[from] jobload_http::Error),
}
