use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use jobload_core::pipeline::SubmitRequest;
use jobload_core::thresholds::ThresholdSet;
use jobload_core::{Stage, ThinkTime};
use serde::Deserialize;

/// Scenario file. Every field is optional; CLI flags win over it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ScenarioFile {
    #[serde(rename = "startVUs")]
    pub start_vus: Option<u64>,

    #[serde(default)]
    pub stages: Vec<StageYaml>,

    pub graceful_ramp_down: Option<YamlDuration>,

    pub think_time: Option<ThinkTimeYaml>,

    #[serde(rename = "maxVUs")]
    pub max_vus: Option<u64>,

    #[serde(default)]
    pub pipeline: PipelineYaml,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdExprYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub target: u64,
    pub duration: YamlDuration,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ThinkTimeYaml {
    pub min: YamlDuration,
    pub max: YamlDuration,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct PipelineYaml {
    pub base_url: Option<String>,
    pub submit_path: Option<String>,
    pub stream_path: Option<String>,
    pub result_path: Option<String>,
    pub strategy: Option<String>,
    pub timing: Option<String>,
    pub stream_timeout: Option<YamlDuration>,
    pub request_timeout: Option<YamlDuration>,
    pub poll_interval: Option<YamlDuration>,
    pub poll_max_attempts: Option<u32>,
    pub expected_stages: Option<Vec<String>>,
    /// Empty string disables reward accounting.
    pub reward_stage: Option<String>,
    pub fetch_result: Option<bool>,
    pub result_settle: Option<YamlDuration>,
    pub idempotency_keys: Option<bool>,
    pub health_path: Option<String>,
    pub health_fatal: Option<bool>,
    pub payload: Option<PayloadYaml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct PayloadYaml {
    pub image_url: Option<String>,
    pub user_input: Option<String>,
    pub session_id: Option<String>,
    pub message: Option<String>,
    pub user_location: Option<serde_json::Value>,
}

impl From<PayloadYaml> for SubmitRequest {
    fn from(p: PayloadYaml) -> Self {
        Self {
            image_url: p.image_url,
            user_input: p.user_input,
            session_id: p.session_id,
            message: p.message,
            user_location: p.user_location,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdExprYaml {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    pub(crate) fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|secs| YamlDuration(Duration::from_secs(secs)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                humantime::parse_duration(v.trim())
                    .map(YamlDuration)
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_any(V)
    }
}

impl ScenarioFile {
    pub(crate) fn stages(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .map(|s| Stage {
                duration: s.duration.into_inner(),
                target: s.target,
            })
            .collect()
    }

    pub(crate) fn think_time(&self) -> Option<ThinkTime> {
        self.think_time.map(|t| ThinkTime {
            min: t.min.into_inner(),
            max: t.max.into_inner(),
        })
    }

    pub(crate) fn threshold_sets(&self) -> Vec<ThresholdSet> {
        self.thresholds
            .iter()
            .map(|(metric, expr)| ThresholdSet {
                metric: metric.clone(),
                expressions: match expr {
                    ThresholdExprYaml::One(s) => vec![s.clone()],
                    ThresholdExprYaml::Many(v) => v.clone(),
                },
            })
            .collect()
    }
}

pub(crate) fn looks_like_yaml_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()).map(|s| s.to_ascii_lowercase()),
        Some(ext) if ext == "yml" || ext == "yaml"
    )
}

pub(crate) fn parse(bytes: &[u8]) -> anyhow::Result<ScenarioFile> {
    // An empty document is a valid "use the defaults" file.
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(ScenarioFile::default());
    }
    Ok(serde_yaml::from_slice(bytes)?)
}

pub(crate) async fn load(path: &Path) -> anyhow::Result<ScenarioFile> {
    if !looks_like_yaml_path(path) {
        anyhow::bail!(
            "unsupported scenario file (expected .yaml or .yml): {}",
            path.display()
        );
    }

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read scenario file: {}", path.display()))?;

    parse(&bytes).with_context(|| format!("failed to parse YAML: {}", path.display()))
}
