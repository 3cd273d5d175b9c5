use serde::Serialize;
use std::io::Write as _;
use std::sync::Arc;

use jobload_metrics::{MetricSeriesSummary, MetricValue};

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _plan: &jobload_core::RunPlan) {}

    fn progress(&self) -> Option<jobload_core::runner::ProgressFn> {
        Some(Arc::new(move |u: jobload_core::runner::ProgressUpdate| {
            emit_json_line(&build_progress_line(&u));
        }))
    }

    fn print_summary(&self, summary: &jobload_core::RunSummary) -> anyhow::Result<()> {
        emit_json_line(&build_summary_line(summary));
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub total_secs: f64,
    pub stage: Option<usize>,
    pub target: f64,
    pub active_vus: u64,
    pub max_vus: u64,
    pub iterations_total: u64,
    pub iterations_per_sec: f64,
    pub jobs: Option<JsonJobProgress>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonJobProgress {
    pub submitted: u64,
    pub completed: u64,
    pub partial: u64,
    pub failed: u64,
    pub timeout: u64,
    pub submit_errors: u64,
    pub active_streams: i64,
}

fn build_progress_line(u: &jobload_core::runner::ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        total_secs: u.total_duration.as_secs_f64(),
        stage: u.stage.as_ref().map(|s| s.index + 1),
        target: u.target,
        active_vus: u.active_vus,
        max_vus: u.max_vus,
        iterations_total: u.iterations_total,
        iterations_per_sec: u.iterations_per_sec_now,
        jobs: u.jobs.map(|j| JsonJobProgress {
            submitted: j.submitted,
            completed: j.completed,
            partial: j.partial,
            failed: j.failed,
            timeout: j.timeout,
            submit_errors: j.submit_errors,
            active_streams: j.active_streams,
        }),
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub elapsed_secs: f64,
    pub iterations: u64,
    pub interrupted: u64,
    pub peak_vus: u64,
    pub vus_spawn_failed: u64,
    pub metrics: Vec<JsonMetric>,
    pub thresholds: Vec<JsonThreshold>,
    pub thresholds_passed: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonMetric {
    pub name: String,
    pub kind: String,
    #[serde(flatten)]
    pub values: JsonMetricValues,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum JsonMetricValues {
    Counter {
        count: u64,
    },
    Gauge {
        value: i64,
    },
    Rate {
        total: u64,
        hits: u64,
        rate: f64,
    },
    Trend {
        count: u64,
        avg: Option<f64>,
        min: Option<f64>,
        med: Option<f64>,
        max: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
    },
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThreshold {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

fn metric(s: &MetricSeriesSummary) -> JsonMetric {
    let values = match &s.values {
        MetricValue::Counter(count) => JsonMetricValues::Counter { count: *count },
        MetricValue::Gauge(value) => JsonMetricValues::Gauge { value: *value },
        MetricValue::Rate { total, hits, rate } => JsonMetricValues::Rate {
            total: *total,
            hits: *hits,
            rate: *rate,
        },
        MetricValue::Trend(t) => JsonMetricValues::Trend {
            count: t.count,
            avg: t.avg,
            min: t.min,
            med: t.med,
            max: t.max,
            p90: t.p90,
            p95: t.p95,
            p99: t.p99,
        },
    };

    JsonMetric {
        name: s.name.clone(),
        kind: s.kind.to_string(),
        values,
    }
}

pub(crate) fn build_summary_line(summary: &jobload_core::RunSummary) -> JsonSummaryLine {
    JsonSummaryLine {
        kind: "summary",
        elapsed_secs: summary.elapsed.as_secs_f64(),
        iterations: summary.scenario.iterations,
        interrupted: summary.scenario.interrupted,
        peak_vus: summary.scenario.peak_vus,
        vus_spawn_failed: summary.scenario.spawn_failed,
        metrics: summary.metrics.iter().map(metric).collect(),
        thresholds: summary
            .thresholds
            .iter()
            .map(|t| JsonThreshold {
                metric: t.metric.clone(),
                expression: t.expression.clone(),
                observed: t.observed,
                passed: t.passed,
            })
            .collect(),
        thresholds_passed: summary.thresholds_passed(),
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobload_core::runner::ScenarioStats;
    use jobload_metrics::{MetricKind, TrendSummary};
    use std::time::Duration;

    #[test]
    fn summary_line_flattens_metric_values() {
        let summary = jobload_core::RunSummary {
            elapsed: Duration::from_millis(1500),
            scenario: ScenarioStats::default(),
            metrics: vec![
                MetricSeriesSummary {
                    name: "completion_rate".to_string(),
                    kind: MetricKind::Rate,
                    values: MetricValue::Rate {
                        total: 4,
                        hits: 3,
                        rate: 0.75,
                    },
                },
                MetricSeriesSummary {
                    name: "submit_duration".to_string(),
                    kind: MetricKind::Trend,
                    values: MetricValue::Trend(TrendSummary::from_sorted(vec![5.0])),
                },
            ],
            thresholds: vec![],
        };

        let json = serde_json::to_value(build_summary_line(&summary))
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(json["kind"], "summary");
        assert_eq!(json["elapsed_secs"], 1.5);
        assert_eq!(json["thresholds_passed"], true);
        assert_eq!(json["metrics"][0]["kind"], "rate");
        assert_eq!(json["metrics"][0]["hits"], 3);
        assert_eq!(json["metrics"][1]["p95"], 5.0);
        assert_eq!(json["metrics"][1]["count"], 1);
    }
}
