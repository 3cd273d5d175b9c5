use std::sync::Arc;

mod format;
mod progress;
mod summary;

use format::{format_duration, format_rate};
use progress::HumanProgress;
use summary::render;

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, plan: &jobload_core::RunPlan) {
        let p = &plan.pipeline;
        let s = &plan.scenario;
        println!("target: {}", p.base_url);
        println!(
            "observe: strategy={} timing={} stages=[{}]",
            p.strategy,
            p.timing,
            p.expected_stages.join(", ")
        );
        println!(
            "profile: {} stages, peak {} VUs, {} (graceful ramp-down {})",
            s.stages.len(),
            s.peak_target(),
            format_duration(s.total_duration()),
            format_duration(s.graceful_ramp_down)
        );
        println!();
    }

    fn progress(&self) -> Option<jobload_core::runner::ProgressFn> {
        let progress = self.progress.clone();

        Some(Arc::new(move |u: jobload_core::runner::ProgressUpdate| {
            let mut msg = format!(
                "vus={}/{} elapsed={} iters/s={}",
                u.active_vus,
                u.max_vus,
                format_duration(u.elapsed),
                format_rate(u.iterations_per_sec_now),
            );
            if let Some(stage) = &u.stage {
                msg.push_str(&format!(
                    " stage={}/{} target={:.1}",
                    stage.index + 1,
                    stage.count,
                    stage.current_target
                ));
            }
            if let Some(jobs) = u.jobs {
                msg.push_str(&format!(
                    " jobs={} done={} partial={} failed={} timeout={} streams={}",
                    jobs.submitted,
                    jobs.completed,
                    jobs.partial,
                    jobs.failed,
                    jobs.timeout,
                    jobs.active_streams
                ));
            }

            progress.update(u.total_duration, u.elapsed, msg);
        }))
    }

    fn print_summary(&self, summary: &jobload_core::RunSummary) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(summary));

        if !summary.thresholds_passed() {
            eprintln!("thresholds failed:");
            for t in summary.failed_thresholds() {
                match t.observed {
                    Some(obs) => eprintln!("  {}: {} (observed {obs})", t.metric, t.expression),
                    None => eprintln!("  {}: {} (missing series)", t.metric, t.expression),
                }
            }
        }

        Ok(())
    }

    fn abort(&self) {
        self.progress.finish();
    }
}
