use std::sync::Arc;
use std::time::Duration;

use jobload_http::HttpClient;
use jobload_metrics::{MetricSeriesSummary, Registry};

use crate::Result;
use crate::clock::{SharedClock, SystemClock};
use crate::config::{PipelineConfig, ScenarioConfig};
use crate::job_metrics::{JobMetrics, VuMetrics};
use crate::pipeline::PipelineClient;
use crate::runner::{JobProgress, ProgressFn, ProgressUpdate, ScenarioStats, run_scenario};
use crate::thresholds::{ThresholdResult, ThresholdSet};
use crate::thresholds_eval::{evaluate_thresholds, validate_thresholds};
use crate::workload::Workload;

/// Everything a run needs, fixed before it starts.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub scenario: ScenarioConfig,
    pub pipeline: PipelineConfig,
    pub thresholds: Vec<ThresholdSet>,
}

impl RunPlan {
    pub fn validate(&self) -> Result<()> {
        self.scenario.validate()?;
        self.pipeline.validate()?;
        validate_thresholds(&self.thresholds)
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub scenario: ScenarioStats,
    pub metrics: Vec<MetricSeriesSummary>,
    pub thresholds: Vec<ThresholdResult>,
}

impl RunSummary {
    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }

    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds.iter().filter(|t| !t.passed)
    }
}

#[derive(Debug, Clone)]
pub struct RunContext {
    pub http: HttpClient,
    pub clock: SharedClock,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            http: HttpClient::default(),
            clock: Arc::new(SystemClock),
        }
    }
}

fn job_progress(metrics: &JobMetrics) -> JobProgress {
    JobProgress {
        submitted: metrics.jobs_submitted.get_counter(),
        completed: metrics.jobs_completed.get_counter(),
        partial: metrics.jobs_partial.get_counter(),
        failed: metrics.jobs_failed.get_counter(),
        timeout: metrics.jobs_timeout.get_counter(),
        submit_errors: metrics.submit_errors.get_counter(),
        active_streams: metrics.active_streams.get_gauge(),
    }
}

/// Pre-run health check, if one is configured. Only aborts the run when the
/// pipeline config marks it fatal.
async fn check_health(client: &PipelineClient) -> Result<()> {
    let cfg = client.config();
    let Some(path) = cfg.health_path.as_deref() else {
        return Ok(());
    };
    match client.check_health(path).await {
        Ok(latency) => {
            tracing::info!(path, ?latency, "pipeline is healthy");
            Ok(())
        }
        Err(err) if cfg.health_fatal => {
            tracing::error!(path, %err, "health check failed, not starting the run");
            Err(err.into())
        }
        Err(err) => {
            tracing::warn!(path, %err, "health check failed, starting the run anyway");
            Ok(())
        }
    }
}

/// Runs the load profile against the pipeline and evaluates thresholds.
///
/// Threshold failures are reported in the summary; they never abort the run.
pub async fn run_load(
    plan: RunPlan,
    ctx: RunContext,
    progress: Option<ProgressFn>,
) -> Result<RunSummary> {
    plan.validate()?;

    let registry = Arc::new(Registry::default());
    let job_metrics = JobMetrics::register(registry.clone())?;
    let vu_metrics = VuMetrics::register(&registry)?;

    let client = PipelineClient::new(
        Arc::new(plan.pipeline),
        ctx.http,
        ctx.clock.clone(),
        job_metrics.clone(),
    )?;
    check_health(&client).await?;
    let workload = Workload::new(client);

    let progress = progress.map(|inner| -> ProgressFn {
        let job_metrics = job_metrics.clone();
        Arc::new(move |mut update: ProgressUpdate| {
            update.jobs = Some(job_progress(&job_metrics));
            inner(update);
        })
    });

    let started = ctx.clock.now();
    let scenario = run_scenario(
        &plan.scenario,
        ctx.clock.clone(),
        vu_metrics,
        move |it| {
            let workload = workload.clone();
            async move { workload.run_iteration(&it).await.end() }
        },
        progress,
    )
    .await?;

    let metrics = registry.summarize();
    let thresholds = evaluate_thresholds(&metrics, &plan.thresholds)?;
    for t in thresholds.iter().filter(|t| !t.passed) {
        tracing::warn!(
            metric = %t.metric,
            expression = %t.expression,
            observed = ?t.observed,
            "threshold failed"
        );
    }

    Ok(RunSummary {
        elapsed: ctx.clock.now() - started,
        scenario,
        metrics,
        thresholds,
    })
}
