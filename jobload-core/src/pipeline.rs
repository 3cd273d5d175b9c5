mod client;
mod error;
mod types;

pub use client::PipelineClient;
pub use error::{HealthError, PollError, StreamError, SubmitError};
pub use types::{JobHandle, JobStatus, ResultResponse, SubmitRequest, SubmitResponse};
