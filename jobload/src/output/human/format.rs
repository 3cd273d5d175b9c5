use std::time::Duration;

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.1}")
    } else {
        "0".to_string()
    }
}

pub(crate) fn format_percent(rate: f64) -> String {
    if rate.is_finite() {
        format!("{:.2}%", rate * 100.0)
    } else {
        "-".to_string()
    }
}

/// Trend samples are milliseconds.
pub(crate) fn format_ms(v: Option<f64>) -> String {
    match v {
        None => "-".to_string(),
        Some(ms) if !ms.is_finite() => "-".to_string(),
        Some(ms) if ms >= 60_000.0 => format!("{:.1}m", ms / 60_000.0),
        Some(ms) if ms >= 1_000.0 => format!("{:.2}s", ms / 1_000.0),
        Some(ms) if ms >= 1.0 => format!("{ms:.2}ms"),
        Some(ms) => format!("{:.0}us", ms * 1_000.0),
    }
}

/// Single rounded component: ms below a second, whole seconds above.
pub(crate) fn format_duration(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        return format!("{}ms", d.as_millis());
    }
    let secs = d.as_secs_f64().round() as u64;
    if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}
