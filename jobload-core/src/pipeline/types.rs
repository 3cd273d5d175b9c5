use std::time::Instant;

use serde::{Deserialize, Serialize};
use url::Url;

/// Body of the job creation request. Unset fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubmitRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Free-form location object forwarded as-is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_location: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubmitResponse {
    #[serde(alias = "task_id")]
    pub job_id: String,
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub result_url: Option<String>,
}

/// A job accepted by the pipeline, owned by one iteration.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: String,
    pub submitted_at: Instant,
    pub stream_url: Option<Url>,
    pub result_url: Option<Url>,
}

/// Anything but `completed` or `failed` means the job is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
    Pending,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultResponse {
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub pipeline_result: Option<serde_json::Value>,
    #[serde(default)]
    pub reward: Option<serde_json::Value>,
}

impl ResultResponse {
    /// A reward counts only when it is an object that names what was granted.
    pub fn has_reward(&self) -> bool {
        self.reward
            .as_ref()
            .and_then(|r| r.get("name"))
            .is_some_and(|name| !name.is_null())
    }

    /// The reward as a stage payload value; `null` unless [`Self::has_reward`].
    pub fn reward_value(&self) -> serde_json::Value {
        match &self.reward {
            Some(reward) if self.has_reward() => reward.clone(),
            _ => serde_json::Value::Null,
        }
    }
}
