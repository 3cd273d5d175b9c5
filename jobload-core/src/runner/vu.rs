use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng as _;

use super::signal::VuSignals;
use crate::clock::SharedClock;
use crate::config::ThinkTime;
use crate::job_metrics::VuMetrics;
use crate::workload::{IterationContext, IterationEnd};

#[derive(Debug, Clone)]
pub(crate) struct VuParams {
    pub think_time: ThinkTime,
    pub submit_failure_pause: Duration,
    pub clock: SharedClock,
}

fn sample_think_time(think: &ThinkTime) -> Duration {
    if think.min >= think.max {
        return think.min;
    }
    rand::thread_rng().gen_range(think.min..=think.max)
}

/// Iteration loop of one virtual user.
///
/// Retirement is checked before each iteration and again once the iteration
/// returns; a forced stop drops the in-flight iteration where it is suspended.
pub(crate) async fn run_vu<F, Fut>(
    vu_id: u64,
    signals: Arc<VuSignals>,
    params: VuParams,
    metrics: VuMetrics,
    iteration: F,
) where
    F: Fn(IterationContext) -> Fut,
    Fut: Future<Output = IterationEnd>,
{
    let _active = metrics.enter_active_vu();
    let mut n: u64 = 0;

    while !signals.retire.is_fired() {
        let ctx = IterationContext::new(vu_id, n, params.clock.as_ref());
        let started = ctx.started_at;

        let end = tokio::select! {
            biased;
            _ = signals.force.wait() => {
                metrics.iterations_interrupted.increment(1);
                tracing::debug!(vu = vu_id, iteration = n, "iteration interrupted");
                return;
            }
            end = iteration(ctx) => end,
        };
        metrics.record_iteration(params.clock.now().saturating_duration_since(started));
        n += 1;

        if signals.retire.is_fired() {
            break;
        }

        let pause = match end {
            IterationEnd::Finished => sample_think_time(&params.think_time),
            IterationEnd::SubmitFailed => params.submit_failure_pause,
        };
        tokio::select! {
            _ = signals.retire.wait() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    tracing::trace!(vu = vu_id, iterations = n, "vu retired");
}
