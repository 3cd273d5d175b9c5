use crate::cli::OutputFormat;

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, plan: &jobload_core::RunPlan);
    fn progress(&self) -> Option<jobload_core::runner::ProgressFn>;
    fn print_summary(&self, summary: &jobload_core::RunSummary) -> anyhow::Result<()>;

    /// Called when the run is cut short; clears any live display.
    fn abort(&self) {}
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Human => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
