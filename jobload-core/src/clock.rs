use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Time source for every timestamp the harness takes.
///
/// `now` is monotonic and used for all measured durations. `unix_time` is
/// wall-clock seconds since the epoch and is only used to line local
/// instants up with timestamps reported by the server.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
    fn unix_time(&self) -> f64;
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    /// Follows tokio's clock so paused-time tests stay deterministic.
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn unix_time(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    base_unix: f64,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(base_unix: f64) -> Self {
        Self {
            base: Instant::now(),
            base_unix,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock();
        *offset = offset.saturating_add(by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }

    fn unix_time(&self) -> f64 {
        self.base_unix + self.offset.lock().as_secs_f64()
    }
}
