#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod correlate;
mod error;
pub mod events;
pub mod job_metrics;
pub mod observation;
pub mod pipeline;
mod run;
pub mod runner;
pub mod thresholds;
pub mod thresholds_eval;
pub mod workload;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    Auth, ObservationStrategy, PipelineConfig, ScenarioConfig, Stage, StageTiming, ThinkTime,
};
pub use correlate::{Disposition, JobOutcome, classify};
pub use error::{Error, Result};
pub use events::{LineAccumulator, parse_events};
pub use observation::{ObservationSet, StageRecord, StageStatus, TerminalStatus};
pub use run::{RunContext, RunPlan, RunSummary, run_load};
pub use thresholds::{ThresholdResult, ThresholdSet, parse_threshold_expr};
pub use thresholds_eval::{evaluate_thresholds, validate_thresholds};
