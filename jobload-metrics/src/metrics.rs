use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use crate::trend::{TrendStore, quantile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Trend,
}

#[derive(Debug, Clone)]
pub struct MetricSeriesSummary {
    pub name: String,
    pub kind: MetricKind,
    pub values: MetricValue,
}

#[derive(Debug, Clone)]
pub enum MetricValue {
    Counter(u64),
    Gauge(i64),
    Rate {
        total: u64,
        hits: u64,
        /// `hits / total`, `0` when nothing was recorded.
        rate: f64,
    },
    Trend(TrendSummary),
}

/// Order statistics of a trend, in the unit the samples were recorded in.
#[derive(Debug, Clone, Default)]
pub struct TrendSummary {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub med: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    sorted: Arc<[f64]>,
}

impl TrendSummary {
    pub fn from_sorted(sorted: Vec<f64>) -> Self {
        let count = sorted.len() as u64;
        let min = sorted.first().copied();
        let max = sorted.last().copied();
        // Summation error can push the mean a hair outside the sample range.
        let avg = match (min, max) {
            (Some(min), Some(max)) => {
                Some((sorted.iter().sum::<f64>() / sorted.len() as f64).clamp(min, max))
            }
            _ => None,
        };

        Self {
            count,
            min,
            max,
            avg,
            med: quantile(&sorted, 0.5),
            p90: quantile(&sorted, 0.9),
            p95: quantile(&sorted, 0.95),
            p99: quantile(&sorted, 0.99),
            sorted: sorted.into(),
        }
    }

    /// Arbitrary quantile, `q` in `[0, 1]`.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        quantile(&self.sorted, q)
    }
}

#[derive(Debug, Default)]
pub struct Rate {
    pub total: AtomicU64,
    pub hits: AtomicU64,
}

/// Cheap, cloneable write handle to one registered series.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    Rate(Arc<Rate>),
    Trend(Arc<TrendStore>),
}

impl MetricHandle {
    pub fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(Arc::new(AtomicU64::new(0))),
            MetricKind::Gauge => Self::Gauge(Arc::new(AtomicI64::new(0))),
            MetricKind::Rate => Self::Rate(Arc::new(Rate::default())),
            MetricKind::Trend => Self::Trend(Arc::new(TrendStore::default())),
        }
    }

    #[inline]
    pub fn increment(&self, value: u64) {
        if let Self::Counter(c) = self {
            c.fetch_add(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn set_gauge(&self, value: i64) {
        if let Self::Gauge(g) = self {
            g.store(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn increment_gauge(&self, value: i64) {
        if let Self::Gauge(g) = self {
            g.fetch_add(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn decrement_gauge(&self, value: i64) {
        if let Self::Gauge(g) = self {
            g.fetch_sub(value, Ordering::Relaxed);
        }
    }

    /// Raises the gauge to `value` if it is currently lower.
    #[inline]
    pub fn raise_gauge(&self, value: i64) {
        if let Self::Gauge(g) = self {
            g.fetch_max(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn add_rate(&self, hits: u64, total: u64) {
        if let Self::Rate(r) = self {
            r.hits.fetch_add(hits, Ordering::Relaxed);
            r.total.fetch_add(total, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_rate(&self, hit: bool) {
        self.add_rate(u64::from(hit), 1);
    }

    #[inline]
    pub fn observe(&self, value: f64) {
        if let Self::Trend(t) = self {
            t.push(value);
        }
    }

    /// Records a duration in milliseconds.
    #[inline]
    pub fn observe_duration(&self, d: Duration) {
        self.observe(d.as_secs_f64() * 1000.0);
    }

    pub fn get_counter(&self) -> u64 {
        if let Self::Counter(c) = self {
            c.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    pub fn get_gauge(&self) -> i64 {
        if let Self::Gauge(g) = self {
            g.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    /// `(total, hits)`
    pub fn get_rate(&self) -> (u64, u64) {
        if let Self::Rate(r) = self {
            (
                r.total.load(Ordering::Relaxed),
                r.hits.load(Ordering::Relaxed),
            )
        } else {
            (0, 0)
        }
    }

    pub fn value(&self) -> MetricValue {
        match self {
            Self::Counter(c) => MetricValue::Counter(c.load(Ordering::Relaxed)),
            Self::Gauge(g) => MetricValue::Gauge(g.load(Ordering::Relaxed)),
            Self::Rate(_) => {
                let (total, hits) = self.get_rate();
                let rate = if total > 0 {
                    hits as f64 / total as f64
                } else {
                    0.0
                };
                MetricValue::Rate { total, hits, rate }
            }
            Self::Trend(t) => MetricValue::Trend(TrendSummary::from_sorted(t.sorted_samples())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_handle_starts_at_zero() {
        match MetricHandle::new(MetricKind::Counter).value() {
            MetricValue::Counter(v) => assert_eq!(v, 0),
            other => panic!("expected counter, got {other:?}"),
        }
        match MetricHandle::new(MetricKind::Gauge).value() {
            MetricValue::Gauge(v) => assert_eq!(v, 0),
            other => panic!("expected gauge, got {other:?}"),
        }
        match MetricHandle::new(MetricKind::Rate).value() {
            MetricValue::Rate { total, hits, rate } => {
                assert_eq!((total, hits), (0, 0));
                assert_eq!(rate, 0.0);
            }
            other => panic!("expected rate, got {other:?}"),
        }
        match MetricHandle::new(MetricKind::Trend).value() {
            MetricValue::Trend(s) => {
                assert_eq!(s.count, 0);
                assert!(s.min.is_none());
                assert!(s.p95.is_none());
                assert!(s.avg.is_none());
            }
            other => panic!("expected trend, got {other:?}"),
        }
    }

    #[test]
    fn counter_gauge_and_rate_update() {
        let c = MetricHandle::new(MetricKind::Counter);
        c.increment(2);
        c.increment(3);
        assert_eq!(c.get_counter(), 5);

        let g = MetricHandle::new(MetricKind::Gauge);
        g.set_gauge(10);
        g.increment_gauge(5);
        g.decrement_gauge(3);
        assert_eq!(g.get_gauge(), 12);
        g.raise_gauge(7);
        assert_eq!(g.get_gauge(), 12);
        g.raise_gauge(20);
        assert_eq!(g.get_gauge(), 20);

        let r = MetricHandle::new(MetricKind::Rate);
        r.add_rate(2, 10);
        r.record_rate(true);
        r.record_rate(false);
        assert_eq!(r.get_rate(), (12, 3));
    }

    #[test]
    fn writes_to_the_wrong_kind_are_ignored() {
        let c = MetricHandle::new(MetricKind::Counter);
        c.observe(10.0);
        c.record_rate(true);
        c.increment_gauge(4);
        assert_eq!(c.get_counter(), 0);
        assert_eq!(c.get_rate(), (0, 0));
    }

    #[test]
    fn rate_of_94_hits_in_100() {
        let r = MetricHandle::new(MetricKind::Rate);
        for i in 0..100 {
            r.record_rate(i < 94);
        }
        let MetricValue::Rate { rate, .. } = r.value() else {
            panic!("expected rate");
        };
        assert!((rate - 0.94).abs() < 1e-12);
    }

    #[test]
    fn trend_summary_respects_order_invariants() {
        let t = MetricHandle::new(MetricKind::Trend);
        for v in [120.0, 5.0, 33.3, 33.3, 900.0, 0.1, 47.0] {
            t.observe(v);
        }
        t.observe_duration(Duration::from_millis(250));

        let MetricValue::Trend(s) = t.value() else {
            panic!("expected trend");
        };
        assert_eq!(s.count, 8);
        let (min, max, avg) = (
            s.min.unwrap_or_else(|| panic!("min")),
            s.max.unwrap_or_else(|| panic!("max")),
            s.avg.unwrap_or_else(|| panic!("avg")),
        );
        let (med, p90, p95, p99) = (
            s.med.unwrap_or_else(|| panic!("med")),
            s.p90.unwrap_or_else(|| panic!("p90")),
            s.p95.unwrap_or_else(|| panic!("p95")),
            s.p99.unwrap_or_else(|| panic!("p99")),
        );
        assert_eq!(min, 0.1);
        assert_eq!(max, 900.0);
        assert!(min <= avg && avg <= max);
        assert!(med <= p90 && p90 <= p95 && p95 <= p99 && p99 <= max);
        assert_eq!(s.quantile(1.0), Some(900.0));
    }

    #[test]
    fn avg_of_identical_samples_stays_within_bounds() {
        let s = TrendSummary::from_sorted(vec![0.1; 10]);
        assert_eq!(s.avg, Some(0.1));
        assert_eq!(s.min, s.max);
    }
}
