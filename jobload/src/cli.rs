use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use jobload_core::{ObservationStrategy, StageTiming};

/// Accepts humantime strings (`250ms`, `1m30s`) and bare seconds (`10`, `2.5`).
pub(crate) fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }

    if let Ok(secs) = s.parse::<f64>() {
        if !secs.is_finite() || secs < 0.0 {
            return Err(format!("invalid duration '{s}' (must be a non-negative number)"));
        }
        return Ok(Duration::from_secs_f64(secs));
    }

    humantime::parse_duration(s)
        .map_err(|err| format!("invalid duration '{s}': {err} (expected e.g. 10s, 250ms, 1m)"))
}

fn parse_threshold_flag(input: &str) -> Result<(String, String), String> {
    let (metric, expr) = input
        .split_once('=')
        .ok_or_else(|| format!("invalid --threshold (expected METRIC=EXPR): {input}"))?;
    let metric = metric.trim();
    let expr = expr.trim();
    if metric.is_empty() || expr.is_empty() {
        return Err(format!("invalid --threshold (expected METRIC=EXPR): {input}"));
    }
    Ok((metric.to_string(), expr.to_string()))
}

fn parse_cookie(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("invalid cookie (expected NAME=VALUE): {input}")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar and a summary table.
    Human,
    /// NDJSON progress lines and one summary object on stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "jobload",
    author,
    version,
    about = "Load testing harness for asynchronous job pipelines",
    long_about = "jobload submits jobs to an asynchronous pipeline from many concurrent virtual users and follows each job over its event stream or by polling its result, recording per-stage latency, completion rates and reward presence.\n\nA run passes when every threshold holds.",
    after_help = "Examples:\n  jobload run --base-url http://127.0.0.1:8080\n  jobload run scenario.yaml --vus 20 --duration 2m\n  jobload run --base-url $URL --strategy stream-then-poll --threshold completion_rate=rate>0.95\n  JOBLOAD_TOKEN=... jobload run scenario.yaml --output json"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load profile against the pipeline
    #[command(
        long_about = "Run a ramping load profile against the pipeline.\n\nFlags override values from the scenario file, which overrides built-in defaults."
    )]
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Scenario file (.yaml/.yml)
    pub scenario: Option<PathBuf>,

    /// Base URL of the pipeline gateway
    #[arg(long, env = "JOBLOAD_BASE_URL")]
    pub base_url: Option<String>,

    /// Bearer token sent as `Authorization: Bearer <token>`
    #[arg(long, env = "JOBLOAD_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Session cookie sent as `Cookie: NAME=VALUE`
    #[arg(long, env = "JOBLOAD_COOKIE", hide_env_values = true, value_name = "NAME=VALUE", value_parser = parse_cookie)]
    pub cookie: Option<(String, String)>,

    /// `image_url` field of the submitted job
    #[arg(long)]
    pub image_url: Option<String>,

    /// `user_input` field of the submitted job
    #[arg(long)]
    pub user_input: Option<String>,

    /// Peak virtual users; builds a ramp-up, steady, ramp-down profile
    #[arg(long)]
    pub vus: Option<u64>,

    /// Ramp-up length (e.g. 30s)
    #[arg(long, value_parser = parse_duration)]
    pub ramp_up: Option<Duration>,

    /// Steady-state length at peak (e.g. 90s)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Ramp-down length (e.g. 30s)
    #[arg(long, value_parser = parse_duration)]
    pub ramp_down: Option<Duration>,

    /// How long retiring VUs may finish their iteration before being interrupted
    #[arg(long, value_parser = parse_duration)]
    pub graceful_ramp_down: Option<Duration>,

    /// Hard cap on concurrently running VUs
    #[arg(long)]
    pub max_vus: Option<u64>,

    /// Minimum think time between iterations
    #[arg(long, value_parser = parse_duration)]
    pub think_min: Option<Duration>,

    /// Maximum think time between iterations
    #[arg(long, value_parser = parse_duration)]
    pub think_max: Option<Duration>,

    /// How jobs are followed: stream | poll | stream-then-poll
    #[arg(long)]
    pub strategy: Option<ObservationStrategy>,

    /// How stage durations are derived: paired | successive | paired-with-fallback
    #[arg(long)]
    pub timing: Option<StageTiming>,

    /// Deadline for one job's event stream
    #[arg(long, value_parser = parse_duration)]
    pub stream_timeout: Option<Duration>,

    /// Deadline for submit and result requests
    #[arg(long, value_parser = parse_duration)]
    pub request_timeout: Option<Duration>,

    /// Pause between result polls
    #[arg(long, value_parser = parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Result polls per job before giving up
    #[arg(long)]
    pub poll_max_attempts: Option<u32>,

    /// Stages a job must complete, comma separated
    #[arg(long, value_delimiter = ',', value_name = "STAGE,...")]
    pub expect_stages: Option<Vec<String>>,

    /// Send a fresh `X-Idempotency-Key` with every submit
    #[arg(long)]
    pub idempotency_keys: bool,

    /// Fetch the result endpoint after a streamed job completes
    #[arg(long)]
    pub fetch_result: bool,

    /// Check this path (e.g. `/api/health`) once before the run starts
    #[arg(long, value_name = "PATH")]
    pub health_path: Option<String>,

    /// Abort instead of warning when the health check fails
    #[arg(long)]
    pub health_fatal: bool,

    /// Threshold on a metric (repeatable), e.g. `completion_rate=rate>0.9`.
    /// Replaces all file/default expressions for that metric.
    #[arg(long = "threshold", value_name = "METRIC=EXPR", value_parser = parse_threshold_flag)]
    pub thresholds: Vec<(String, String)>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,

    /// Log filter for stderr logs (overrides RUST_LOG), e.g. `debug` or `jobload_core=trace`
    #[arg(long)]
    pub log_level: Option<String>,
}
