use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context as _;
use jobload_core::thresholds::ThresholdSet;
use jobload_core::{
    Auth, PipelineConfig, RunContext, RunPlan, ScenarioConfig, Stage, ThinkTime, run_load,
};

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;
use crate::scenario_yaml::{self, ScenarioFile};

const DEFAULT_VUS: u64 = 50;
const DEFAULT_RAMP_UP: Duration = Duration::from_secs(30);
const DEFAULT_STEADY: Duration = Duration::from_secs(90);
const DEFAULT_RAMP_DOWN: Duration = Duration::from_secs(30);

const DEFAULT_THRESHOLDS: [(&str, &str); 4] = [
    ("submit_success_rate", "rate>0.90"),
    ("completion_rate", "rate>0.85"),
    ("submit_duration", "p(95)<5000"),
    ("pipeline_duration", "p(95)<60000"),
];

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let file = match &args.scenario {
        Some(path) => scenario_yaml::load(path).await.map_err(RunError::invalid)?,
        None => ScenarioFile::default(),
    };

    let plan = resolve_plan(&args, file).map_err(RunError::invalid)?;
    plan.validate()
        .context("invalid run configuration")
        .map_err(RunError::invalid)?;

    tracing::debug!(
        base_url = %plan.pipeline.base_url,
        strategy = %plan.pipeline.strategy,
        stages = plan.scenario.stages.len(),
        thresholds = plan.thresholds.len(),
        "resolved run plan"
    );

    let out = output::formatter(args.output);
    out.print_header(&plan);

    let summary = tokio::select! {
        res = run_load(plan, RunContext::default(), out.progress()) => {
            res.context("load run failed").map_err(RunError::runtime)?
        }
        _ = tokio::signal::ctrl_c() => {
            out.abort();
            return Err(RunError::runtime(anyhow::anyhow!("interrupted")));
        }
    };

    out.print_summary(&summary).map_err(RunError::runtime)?;

    Ok(ExitCode::from_thresholds(summary.thresholds_passed()))
}

/// Merges CLI flags over the scenario file over built-in defaults.
pub(crate) fn resolve_plan(args: &RunArgs, file: ScenarioFile) -> anyhow::Result<RunPlan> {
    let scenario = resolve_scenario(args, &file);
    let thresholds = resolve_thresholds(args, &file);
    let pipeline = resolve_pipeline(args, file)?;

    Ok(RunPlan {
        scenario,
        pipeline,
        thresholds,
    })
}

fn ramp_profile(vus: u64, ramp_up: Duration, steady: Duration, ramp_down: Duration) -> Vec<Stage> {
    [(ramp_up, vus), (steady, vus), (ramp_down, 0)]
        .into_iter()
        .filter(|(duration, _)| !duration.is_zero())
        .map(|(duration, target)| Stage { duration, target })
        .collect()
}

fn resolve_scenario(args: &RunArgs, file: &ScenarioFile) -> ScenarioConfig {
    let defaults = ScenarioConfig::default();

    let profile_flags = args.vus.is_some()
        || args.ramp_up.is_some()
        || args.duration.is_some()
        || args.ramp_down.is_some();

    let (start_vus, stages) = if profile_flags || file.stages.is_empty() {
        let file_peak = file.stages.iter().map(|s| s.target).max();
        let vus = args.vus.or(file_peak).unwrap_or(DEFAULT_VUS);
        let ramp_up = args.ramp_up.unwrap_or(DEFAULT_RAMP_UP);
        let stages = ramp_profile(
            vus,
            ramp_up,
            args.duration.unwrap_or(DEFAULT_STEADY),
            args.ramp_down.unwrap_or(DEFAULT_RAMP_DOWN),
        );
        // No ramp-up means starting at the peak.
        (if ramp_up.is_zero() { vus } else { 0 }, stages)
    } else {
        (file.start_vus.unwrap_or(defaults.start_vus), file.stages())
    };

    let file_think = file.think_time();
    let think_time = ThinkTime {
        min: args
            .think_min
            .or(file_think.map(|t| t.min))
            .unwrap_or(defaults.think_time.min),
        max: args
            .think_max
            .or(file_think.map(|t| t.max))
            .unwrap_or(defaults.think_time.max),
    };

    ScenarioConfig {
        start_vus,
        stages,
        graceful_ramp_down: args
            .graceful_ramp_down
            .or(file.graceful_ramp_down.map(|d| d.into_inner()))
            .unwrap_or(defaults.graceful_ramp_down),
        think_time,
        submit_failure_pause: defaults.submit_failure_pause,
        max_vus: args.max_vus.or(file.max_vus),
    }
}

fn resolve_thresholds(args: &RunArgs, file: &ScenarioFile) -> Vec<ThresholdSet> {
    let mut by_metric: BTreeMap<String, Vec<String>> = if file.thresholds.is_empty() {
        DEFAULT_THRESHOLDS
            .iter()
            .map(|(metric, expr)| (metric.to_string(), vec![expr.to_string()]))
            .collect()
    } else {
        file.threshold_sets()
            .into_iter()
            .map(|set| (set.metric, set.expressions))
            .collect()
    };

    let mut overridden: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (metric, expr) in &args.thresholds {
        overridden.entry(metric.as_str()).or_default().push(expr.clone());
    }
    for (metric, exprs) in overridden {
        by_metric.insert(metric.to_string(), exprs);
    }

    by_metric
        .into_iter()
        .map(|(metric, expressions)| ThresholdSet {
            metric,
            expressions,
        })
        .collect()
}

fn resolve_pipeline(args: &RunArgs, file: ScenarioFile) -> anyhow::Result<PipelineConfig> {
    let p = file.pipeline;

    let base_url = args
        .base_url
        .clone()
        .or(p.base_url)
        .context("missing base URL (use --base-url, JOBLOAD_BASE_URL or pipeline.baseUrl)")?;
    let mut cfg = PipelineConfig::new(&base_url)?;

    if let Some(v) = p.submit_path {
        cfg.submit_path = v;
    }
    if let Some(v) = p.stream_path {
        cfg.stream_path = v;
    }
    if let Some(v) = p.result_path {
        cfg.result_path = v;
    }

    cfg.auth = match (&args.token, &args.cookie) {
        (Some(token), _) => Auth::Bearer(token.clone()),
        (None, Some((name, value))) => Auth::Cookie {
            name: name.clone(),
            value: value.clone(),
        },
        (None, None) => Auth::None,
    };

    if let Some(payload) = p.payload {
        cfg.payload = payload.into();
    }
    if let Some(v) = &args.image_url {
        cfg.payload.image_url = Some(v.clone());
    }
    if let Some(v) = &args.user_input {
        cfg.payload.user_input = Some(v.clone());
    }

    if let Some(strategy) = args.strategy {
        cfg.strategy = strategy;
    } else if let Some(raw) = p.strategy.as_deref() {
        cfg.strategy = raw
            .parse()
            .with_context(|| format!("invalid pipeline.strategy: {raw}"))?;
    }
    if let Some(timing) = args.timing {
        cfg.timing = timing;
    } else if let Some(raw) = p.timing.as_deref() {
        cfg.timing = raw
            .parse()
            .with_context(|| format!("invalid pipeline.timing: {raw}"))?;
    }

    if let Some(v) = args.stream_timeout.or(p.stream_timeout.map(|d| d.into_inner())) {
        cfg.stream_timeout = v;
    }
    if let Some(v) = args
        .request_timeout
        .or(p.request_timeout.map(|d| d.into_inner()))
    {
        cfg.request_timeout = v;
    }
    if let Some(v) = args.poll_interval.or(p.poll_interval.map(|d| d.into_inner())) {
        cfg.poll_interval = v;
    }
    if let Some(v) = args.poll_max_attempts.or(p.poll_max_attempts) {
        cfg.poll_max_attempts = v;
    }
    if let Some(v) = p.result_settle {
        cfg.result_settle = v.into_inner();
    }
    if let Some(v) = args.expect_stages.clone().or(p.expected_stages) {
        cfg.expected_stages = v;
    }
    if let Some(v) = p.reward_stage {
        cfg.reward_stage = (!v.is_empty()).then_some(v);
    }

    cfg.fetch_result = args.fetch_result || p.fetch_result.unwrap_or(false);
    cfg.idempotency_keys = args.idempotency_keys || p.idempotency_keys.unwrap_or(false);
    if let Some(v) = args.health_path.clone().or(p.health_path) {
        cfg.health_path = (!v.is_empty()).then_some(v);
    }
    cfg.health_fatal = args.health_fatal || p.health_fatal.unwrap_or(false);

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser as _;
    use jobload_core::ObservationStrategy;

    fn args(extra: &[&str]) -> RunArgs {
        let argv = ["jobload", "run"].iter().chain(extra.iter()).copied();
        match Cli::try_parse_from(argv) {
            Ok(Cli {
                command: Command::Run(args),
            }) => args,
            Err(err) => panic!("failed to parse args: {err}"),
        }
    }

    fn file(src: &str) -> ScenarioFile {
        scenario_yaml::parse(src.as_bytes()).unwrap_or_else(|e| panic!("{e:#}"))
    }

    fn plan(extra: &[&str], src: &str) -> RunPlan {
        resolve_plan(&args(extra), file(src)).unwrap_or_else(|e| panic!("{e:#}"))
    }

    #[test]
    fn defaults_follow_the_gateway_profile() {
        let plan = plan(&["--base-url", "http://127.0.0.1:1"], "");

        assert_eq!(plan.scenario.peak_target(), 50);
        assert_eq!(plan.scenario.total_duration(), Duration::from_secs(150));
        assert_eq!(plan.scenario.graceful_ramp_down, Duration::from_secs(10));
        assert_eq!(plan.thresholds.len(), 4);
        assert_eq!(plan.pipeline.poll_max_attempts, 30);
        assert_eq!(plan.pipeline.auth, Auth::None);
        plan.validate().unwrap_or_else(|e| panic!("{e}"));
    }

    #[test]
    fn file_stages_are_used_when_no_profile_flags_are_given() {
        let src = "startVUs: 2\nstages:\n  - { duration: 10s, target: 5 }\n  - { duration: 20s, target: 5 }\npipeline:\n  baseUrl: http://file.example\n";
        let plan = plan(&[], src);

        assert_eq!(plan.scenario.start_vus, 2);
        assert_eq!(plan.scenario.stages.len(), 2);
        assert_eq!(plan.scenario.total_duration(), Duration::from_secs(30));
        assert_eq!(plan.pipeline.base_url.as_str(), "http://file.example/");
    }

    #[test]
    fn cli_vus_rebuilds_the_profile_over_file_stages() {
        let src = "startVUs: 2\nstages:\n  - { duration: 10s, target: 5 }\n";
        let plan = plan(
            &[
                "--base-url",
                "http://cli.example",
                "--vus",
                "8",
                "--ramp-up",
                "0s",
                "--duration",
                "1m",
            ],
            src,
        );

        assert_eq!(plan.scenario.start_vus, 8);
        assert_eq!(
            plan.scenario.stages,
            vec![
                Stage {
                    duration: Duration::from_secs(60),
                    target: 8
                },
                Stage {
                    duration: DEFAULT_RAMP_DOWN,
                    target: 0
                },
            ]
        );
    }

    #[test]
    fn cli_values_win_over_file_values() {
        let src = "gracefulRampDown: 5s\nthinkTime: { min: 2s, max: 4s }\npipeline:\n  baseUrl: http://file.example\n  strategy: poll\n  pollMaxAttempts: 3\n";
        let plan = plan(
            &[
                "--base-url",
                "http://cli.example",
                "--strategy",
                "stream",
                "--think-max",
                "6s",
                "--poll-max-attempts",
                "7",
            ],
            src,
        );

        assert_eq!(plan.pipeline.base_url.as_str(), "http://cli.example/");
        assert_eq!(plan.pipeline.strategy, ObservationStrategy::Stream);
        assert_eq!(plan.pipeline.poll_max_attempts, 7);
        assert_eq!(plan.scenario.graceful_ramp_down, Duration::from_secs(5));
        assert_eq!(plan.scenario.think_time.min, Duration::from_secs(2));
        assert_eq!(plan.scenario.think_time.max, Duration::from_secs(6));
    }

    #[test]
    fn threshold_flags_replace_per_metric() {
        let src = "thresholds:\n  completion_rate: rate>0.5\n  submit_duration: p(95)<1000\n";
        let plan = plan(
            &[
                "--base-url",
                "http://x",
                "--threshold",
                "completion_rate=rate>0.99",
                "--threshold",
                "completion_rate=count>10",
            ],
            src,
        );

        assert_eq!(plan.thresholds.len(), 2);
        let completion = plan
            .thresholds
            .iter()
            .find(|t| t.metric == "completion_rate")
            .unwrap_or_else(|| panic!("missing completion_rate"));
        assert_eq!(completion.expressions, vec!["rate>0.99", "count>10"]);
    }

    #[test]
    fn token_takes_precedence_over_cookie() {
        let plan = plan(
            &["--base-url", "http://x", "--token", "t", "--cookie", "s=v"],
            "",
        );
        assert_eq!(plan.pipeline.auth, Auth::Bearer("t".to_string()));
    }

    #[test]
    fn empty_reward_stage_disables_reward_accounting() {
        let plan = plan(&["--base-url", "http://x"], "pipeline:\n  rewardStage: \"\"\n");
        assert_eq!(plan.pipeline.reward_stage, None);
    }

    #[test]
    fn health_check_is_off_unless_configured() {
        let plan = plan(&["--base-url", "http://x"], "");
        assert_eq!(plan.pipeline.health_path, None);
        assert!(!plan.pipeline.health_fatal);
    }

    #[test]
    fn health_check_settings_merge_file_and_flags() {
        let src = "pipeline:\n  healthPath: /health\n  healthFatal: false\n";
        let from_file = plan(&["--base-url", "http://x"], src);
        assert_eq!(from_file.pipeline.health_path.as_deref(), Some("/health"));
        assert!(!from_file.pipeline.health_fatal);

        let from_flags = plan(
            &["--base-url", "http://x", "--health-path", "/api/health", "--health-fatal"],
            src,
        );
        assert_eq!(from_flags.pipeline.health_path.as_deref(), Some("/api/health"));
        assert!(from_flags.pipeline.health_fatal);
    }

    #[test]
    fn missing_base_url_is_an_error() {
        assert!(resolve_plan(&args(&[]), ScenarioFile::default()).is_err());
    }

    #[test]
    fn invalid_file_strategy_is_an_error() {
        let res = resolve_plan(
            &args(&["--base-url", "http://x"]),
            file("pipeline:\n  strategy: carrier-pigeon\n"),
        );
        assert!(res.is_err());
    }
}
