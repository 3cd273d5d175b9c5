mod progress;
mod run;
mod schedule;
mod signal;
mod vu;

pub use progress::{JobProgress, ProgressFn, ProgressUpdate};
pub use run::{ScenarioStats, run_scenario};
pub use schedule::{RampingSchedule, StageSnapshot};
pub use signal::{StopSignal, VuSignals};
