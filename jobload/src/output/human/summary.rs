use std::fmt::Write as _;

use jobload_core::RunSummary;
use jobload_metrics::{MetricKind, MetricSeriesSummary, MetricValue};

use super::format::{format_duration, format_ms, format_percent};

const KIND_ORDER: [(MetricKind, &str); 4] = [
    (MetricKind::Counter, "counters"),
    (MetricKind::Rate, "rates"),
    (MetricKind::Trend, "trends (ms)"),
    (MetricKind::Gauge, "gauges"),
];

pub(crate) fn render(summary: &RunSummary) -> String {
    let mut out = String::new();
    let s = &summary.scenario;

    out.push_str("summary\n");
    writeln!(out, "  elapsed: {}", format_duration(summary.elapsed)).ok();
    writeln!(
        out,
        "  iterations: {} (interrupted {})",
        s.iterations, s.interrupted
    )
    .ok();
    writeln!(out, "  peak_vus: {}", s.peak_vus).ok();
    if s.spawn_failed > 0 {
        writeln!(out, "  vus_spawn_failed: {}", s.spawn_failed).ok();
    }

    render_metrics(&summary.metrics, &mut out);
    render_thresholds(summary, &mut out);
    out
}

fn render_metrics(series: &[MetricSeriesSummary], out: &mut String) {
    let width = series.iter().map(|s| s.name.len()).max().unwrap_or(0);

    for (kind, title) in KIND_ORDER {
        let rows: Vec<&MetricSeriesSummary> = series.iter().filter(|s| s.kind == kind).collect();
        if rows.is_empty() {
            continue;
        }

        writeln!(out, "\n{title}").ok();
        for s in rows {
            let name = &s.name;
            match &s.values {
                MetricValue::Counter(v) => {
                    writeln!(out, "  {name:<width$}  {v}").ok();
                }
                MetricValue::Gauge(v) => {
                    writeln!(out, "  {name:<width$}  {v}").ok();
                }
                MetricValue::Rate { total, hits, rate } => {
                    writeln!(
                        out,
                        "  {name:<width$}  {} ({hits}/{total})",
                        format_percent(*rate)
                    )
                    .ok();
                }
                MetricValue::Trend(t) => {
                    writeln!(
                        out,
                        "  {name:<width$}  avg={} min={} med={} max={} p(90)={} p(95)={} p(99)={} n={}",
                        format_ms(t.avg),
                        format_ms(t.min),
                        format_ms(t.med),
                        format_ms(t.max),
                        format_ms(t.p90),
                        format_ms(t.p95),
                        format_ms(t.p99),
                        t.count
                    )
                    .ok();
                }
            }
        }
    }
}

fn render_thresholds(summary: &RunSummary, out: &mut String) {
    if summary.thresholds.is_empty() {
        return;
    }

    out.push_str("\nthresholds\n");
    for t in &summary.thresholds {
        let mark = if t.passed { "ok  " } else { "FAIL" };
        let observed = t
            .observed
            .map_or_else(|| "missing series".to_string(), |v| format!("observed {v}"));
        writeln!(out, "  {mark} {}: {} ({observed})", t.metric, t.expression).ok();
    }
}
