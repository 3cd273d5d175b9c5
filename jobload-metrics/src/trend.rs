use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

const SHARDS: usize = 16;

/// Append-only sample buffer for one trend series.
///
/// Writers are spread over independent shards so concurrent VUs rarely
/// contend on the same lock. Samples are only ordered when summarized.
#[derive(Debug)]
pub struct TrendStore {
    shards: Box<[Mutex<Vec<f64>>]>,
    next: AtomicUsize,
}

impl Default for TrendStore {
    fn default() -> Self {
        Self::with_shards(SHARDS)
    }
}

impl TrendStore {
    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| Mutex::new(Vec::new())).collect();
        Self {
            shards,
            next: AtomicUsize::new(0),
        }
    }

    /// Non-finite samples are dropped.
    #[inline]
    pub fn push(&self, value: f64) {
        if !value.is_finite() {
            return;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.shards.len();
        self.shards[idx].lock().push(value);
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All samples, sorted ascending.
    pub fn sorted_samples(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            out.extend_from_slice(&shard.lock());
        }
        out.sort_unstable_by(f64::total_cmp);
        out
    }
}

/// Quantile `q` in `[0, 1]` of an ascending slice.
///
/// Uses `index = q * (n - 1)` with linear interpolation between the two
/// bracketing samples. Returns `None` for an empty slice.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let q = q.clamp(0.0, 1.0);
    let pos = q * last as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let (a, b) = (sorted[lo], sorted[hi.min(last)]);
    if lo == hi {
        return Some(a);
    }
    Some(a + (b - a) * (pos - lo as f64))
}
