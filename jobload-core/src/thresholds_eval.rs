use jobload_metrics::{MetricSeriesSummary, MetricValue};

use crate::thresholds::{
    ThresholdAgg, ThresholdOp, ThresholdResult, ThresholdSet, parse_threshold_expr,
};
use crate::{Error, Result};

/// Rejects unparseable expressions before a run starts.
pub fn validate_thresholds(sets: &[ThresholdSet]) -> Result<()> {
    for set in sets {
        for expr in &set.expressions {
            parse_threshold_expr(expr).map_err(|error| Error::InvalidThresholdExpr {
                metric: set.metric.clone(),
                error,
            })?;
        }
    }
    Ok(())
}

/// Evaluates every expression against the end-of-run metric summaries.
///
/// A missing metric, or an aggregate that does not apply to the metric's kind,
/// fails the expression with no observed value.
pub fn evaluate_thresholds(
    metrics: &[MetricSeriesSummary],
    sets: &[ThresholdSet],
) -> Result<Vec<ThresholdResult>> {
    let mut out: Vec<ThresholdResult> = Vec::new();

    for set in sets {
        let series = metrics.iter().find(|m| m.name == set.metric);

        for expr_raw in &set.expressions {
            let expr =
                parse_threshold_expr(expr_raw).map_err(|error| Error::InvalidThresholdExpr {
                    metric: set.metric.clone(),
                    error,
                })?;

            let observed = series.and_then(|s| observed_value(&s.values, expr.agg));
            let passed = observed.is_some_and(|v| compare(v, expr.op, expr.value));

            out.push(ThresholdResult {
                metric: set.metric.clone(),
                expression: expr_raw.clone(),
                observed,
                passed,
            });
        }
    }

    Ok(out)
}

fn observed_value(values: &MetricValue, agg: ThresholdAgg) -> Option<f64> {
    match (agg, values) {
        (ThresholdAgg::Count, MetricValue::Counter(v)) => Some(*v as f64),
        (ThresholdAgg::Count, MetricValue::Rate { total, .. }) => Some(*total as f64),
        (ThresholdAgg::Count, MetricValue::Trend(t)) => Some(t.count as f64),

        (ThresholdAgg::Rate, MetricValue::Rate { rate, .. }) => Some(*rate),

        (ThresholdAgg::Value, MetricValue::Gauge(v)) => Some(*v as f64),

        (ThresholdAgg::Avg, MetricValue::Trend(t)) => t.avg,
        (ThresholdAgg::Min, MetricValue::Trend(t)) => t.min,
        (ThresholdAgg::Max, MetricValue::Trend(t)) => t.max,
        (ThresholdAgg::Med, MetricValue::Trend(t)) => t.med,
        (ThresholdAgg::P(p), MetricValue::Trend(t)) => t.quantile(p / 100.0),

        _ => None,
    }
}

fn compare(observed: f64, op: ThresholdOp, expected: f64) -> bool {
    match op {
        ThresholdOp::Lt => observed < expected,
        ThresholdOp::Lte => observed <= expected,
        ThresholdOp::Gt => observed > expected,
        ThresholdOp::Gte => observed >= expected,
        ThresholdOp::Eq => observed == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobload_metrics::{MetricKind, Registry};

    fn set(metric: &str, exprs: &[&str]) -> ThresholdSet {
        ThresholdSet {
            metric: metric.to_string(),
            expressions: exprs.iter().map(|e| e.to_string()).collect(),
        }
    }

    fn eval(registry: &Registry, sets: &[ThresholdSet]) -> Vec<ThresholdResult> {
        evaluate_thresholds(&registry.summarize(), sets).unwrap_or_else(|e| panic!("{e}"))
    }

    fn handle(registry: &Registry, name: &str, kind: MetricKind) -> jobload_metrics::MetricHandle {
        registry
            .handle_for(name, kind)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn missing_metric_fails_threshold() {
        let metrics = Registry::default();
        let v = eval(&metrics, &[set("nope", &["count>0"])]);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].metric, "nope");
        assert!(v[0].observed.is_none());
        assert!(!v[0].passed);
    }

    #[test]
    fn rate_of_94_percent_fails_rate_above_95() {
        let metrics = Registry::default();
        let r = handle(&metrics, "completion_rate", MetricKind::Rate);
        for i in 0..100 {
            r.record_rate(i < 94);
        }

        let v = eval(&metrics, &[set("completion_rate", &["rate>0.95", "rate>0.90"])]);
        assert!(!v[0].passed);
        assert!(v[1].passed);
        let observed = v[0].observed.unwrap_or_else(|| panic!("expected observed value"));
        assert!((observed - 0.94).abs() < 1e-12);
    }

    #[test]
    fn counter_count_and_trend_percentiles() {
        let metrics = Registry::default();
        handle(&metrics, "jobs_completed", MetricKind::Counter).increment(2);
        let t = handle(&metrics, "submit_duration", MetricKind::Trend);
        for v in 1..=100 {
            t.observe(v as f64);
        }

        let v = eval(
            &metrics,
            &[
                set("jobs_completed", &["count==2"]),
                set("submit_duration", &["p(95)<97", "med==50.5", "max<=100", "avg<50"]),
            ],
        );
        let passed: Vec<bool> = v.iter().map(|r| r.passed).collect();
        assert_eq!(passed, vec![true, true, true, true, false]);
    }

    #[test]
    fn aggregate_not_applicable_to_kind_fails() {
        let metrics = Registry::default();
        handle(&metrics, "jobs_completed", MetricKind::Counter).increment(1);
        handle(&metrics, "vus_max", MetricKind::Gauge).set_gauge(5);

        let v = eval(
            &metrics,
            &[
                set("jobs_completed", &["p(95)<1"]),
                set("vus_max", &["value>=5", "rate>0"]),
            ],
        );
        assert!(!v[0].passed && v[0].observed.is_none());
        assert!(v[1].passed);
        assert!(!v[2].passed && v[2].observed.is_none());
    }

    #[test]
    fn invalid_expression_is_a_configuration_error() {
        let sets = [set("submit_duration", &["p(95)<1", "bogus"])];
        assert!(matches!(
            validate_thresholds(&sets),
            Err(Error::InvalidThresholdExpr { .. })
        ));
        assert!(evaluate_thresholds(&[], &sets).is_err());
    }
}
