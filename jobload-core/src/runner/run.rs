use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::progress::{ProgressFn, ProgressUpdate};
use super::schedule::RampingSchedule;
use super::signal::VuSignals;
use super::vu::{VuParams, run_vu};
use crate::Result;
use crate::clock::SharedClock;
use crate::config::ScenarioConfig;
use crate::job_metrics::VuMetrics;
use crate::workload::{IterationContext, IterationEnd};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioStats {
    pub elapsed: Duration,
    pub iterations: u64,
    pub interrupted: u64,
    pub peak_vus: u64,
    pub spawn_failed: u64,
}

struct LiveVu {
    id: u64,
    signals: Arc<VuSignals>,
    task: Option<JoinHandle<()>>,
    retired_at: Option<std::time::Instant>,
}

impl LiveVu {
    /// A VU task that panicked loses its in-flight iteration; the run goes on.
    async fn join(&mut self, metrics: &VuMetrics) {
        if let Some(task) = self.task.as_mut()
            && let Err(err) = task.await
        {
            tracing::error!(vu = self.id, %err, "vu task ended abnormally");
            metrics.iterations_interrupted.increment(1);
        }
        self.task = None;
    }
}

async fn join_all(live: &mut BTreeMap<u64, LiveVu>, metrics: &VuMetrics) {
    for vu in live.values_mut() {
        vu.join(metrics).await;
    }
}

async fn reap_finished(live: &mut BTreeMap<u64, LiveVu>, metrics: &VuMetrics) {
    let finished: Vec<u64> = live
        .iter()
        .filter(|(_, vu)| vu.task.as_ref().is_none_or(|t| t.is_finished()))
        .map(|(id, _)| *id)
        .collect();
    for id in finished {
        if let Some(mut vu) = live.remove(&id) {
            vu.join(metrics).await;
        }
    }
}

/// Drives one ramping scenario to completion.
///
/// VU `n` runs while `n <= target(t)`. When the target falls, surplus VUs are
/// asked to retire after their current iteration and are interrupted once
/// `graceful_ramp_down` has passed. The same grace period applies at the end
/// of the scenario. Elapsed time and iteration timings are read from `clock`.
pub async fn run_scenario<F, Fut>(
    scenario: &ScenarioConfig,
    clock: SharedClock,
    metrics: VuMetrics,
    iteration: F,
    progress: Option<ProgressFn>,
) -> Result<ScenarioStats>
where
    F: Fn(IterationContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = IterationEnd> + Send + 'static,
{
    scenario.validate()?;

    let schedule = RampingSchedule::new(scenario.start_vus, scenario.stages.clone());
    let max_vus = scenario.max_vus.unwrap_or_else(|| schedule.peak_target());
    let slots = Arc::new(Semaphore::new(
        usize::try_from(max_vus)
            .unwrap_or(Semaphore::MAX_PERMITS)
            .min(Semaphore::MAX_PERMITS),
    ));
    let params = VuParams {
        think_time: scenario.think_time,
        submit_failure_pause: scenario.submit_failure_pause,
        clock: clock.clone(),
    };

    let started = clock.now();
    let since_start = || clock.now().saturating_duration_since(started);
    let mut live: BTreeMap<u64, LiveVu> = BTreeMap::new();
    let mut spawn_failed: HashSet<u64> = HashSet::new();

    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    ticker.reset();
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tick: u64 = 0;
    let mut last_iterations: u64 = 0;

    tracing::info!(
        stages = scenario.stages.len(),
        max_vus,
        duration = ?schedule.total_duration(),
        "scenario started"
    );

    loop {
        let elapsed = since_start();
        if schedule.is_done(elapsed) {
            break;
        }

        reap_finished(&mut live, &metrics).await;

        let desired = schedule.active_vus_at(elapsed);
        for vu_id in 1..=desired {
            if live.contains_key(&vu_id) {
                continue;
            }
            let Ok(permit) = slots.clone().try_acquire_owned() else {
                if spawn_failed.insert(vu_id) {
                    metrics.vus_spawn_failed.increment(1);
                    tracing::warn!(vu = vu_id, max_vus, "no VU slot available, running below target");
                }
                continue;
            };

            let signals = Arc::new(VuSignals::default());
            let task = tokio::spawn({
                let signals = signals.clone();
                let metrics = metrics.clone();
                let iteration = iteration.clone();
                let params = params.clone();
                async move {
                    let _permit = permit;
                    run_vu(vu_id, signals, params, metrics, iteration).await;
                }
            });
            live.insert(
                vu_id,
                LiveVu {
                    id: vu_id,
                    signals,
                    task: Some(task),
                    retired_at: None,
                },
            );
        }

        let now = clock.now();
        for vu in live.range_mut(desired.saturating_add(1)..).map(|(_, vu)| vu) {
            match vu.retired_at {
                None => {
                    vu.signals.retire.fire();
                    vu.retired_at = Some(now);
                }
                Some(at) if now.duration_since(at) >= scenario.graceful_ramp_down => {
                    vu.signals.force.fire();
                }
                Some(_) => {}
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(schedule.next_recheck_in(elapsed)) => {}
            _ = ticker.tick(), if progress.is_some() => {
                if let Some(progress) = progress.as_ref() {
                    tick += 1;
                    let iterations = metrics.iterations_total.get_counter();
                    let elapsed = since_start();
                    progress(ProgressUpdate {
                        tick,
                        elapsed,
                        total_duration: schedule.total_duration(),
                        stage: schedule.stage_snapshot_at(elapsed),
                        target: schedule.target_at(elapsed),
                        active_vus: u64::try_from(metrics.vus.get_gauge()).unwrap_or(0),
                        max_vus,
                        iterations_total: iterations,
                        iterations_per_sec_now: iterations.saturating_sub(last_iterations) as f64
                            / PROGRESS_INTERVAL.as_secs_f64(),
                        jobs: None,
                    });
                    last_iterations = iterations;
                }
            }
        }
    }

    for vu in live.values() {
        vu.signals.retire.fire();
    }
    let drained =
        tokio::time::timeout(scenario.graceful_ramp_down, join_all(&mut live, &metrics)).await;
    if drained.is_err() {
        let remaining = live.values().filter(|vu| vu.task.is_some()).count();
        tracing::info!(remaining, "graceful ramp-down elapsed, interrupting remaining VUs");
        for vu in live.values() {
            vu.signals.force.fire();
        }
        join_all(&mut live, &metrics).await;
    }

    let stats = ScenarioStats {
        elapsed: since_start(),
        iterations: metrics.iterations_total.get_counter(),
        interrupted: metrics.iterations_interrupted.get_counter(),
        peak_vus: u64::try_from(metrics.vus_max.get_gauge()).unwrap_or(0),
        spawn_failed: metrics.vus_spawn_failed.get_counter(),
    };
    tracing::info!(
        iterations = stats.iterations,
        interrupted = stats.interrupted,
        elapsed = ?stats.elapsed,
        "scenario finished"
    );
    Ok(stats)
}
