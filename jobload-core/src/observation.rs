use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Pending,
    Started,
    Completed,
}

/// Terminal status announced by the job itself, independent of stage records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TerminalStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StageRecord {
    pub name: String,
    pub status: StageStatus,
    /// Server timestamps, seconds since the epoch.
    pub started_at: Option<f64>,
    pub completed_at: Option<f64>,
    pub duration: Option<Duration>,
    pub payload: Option<serde_json::Value>,
}

impl StageRecord {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StageStatus::Completed
    }
}

/// Everything recovered about one job's progress, from a stream or from polling.
///
/// Holds at most one record per stage name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObservationSet {
    pub records: Vec<StageRecord>,
    pub events_total: u64,
    pub duplicates: u64,
    pub discarded_lines: u64,
    pub time_to_first_event: Option<Duration>,
    pub terminal: Option<TerminalStatus>,
    pub elapsed: Duration,
}

impl ObservationSet {
    pub fn record(&self, name: &str) -> Option<&StageRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    pub fn is_completed(&self, name: &str) -> bool {
        self.record(name).is_some_and(StageRecord::is_completed)
    }

    pub fn completed_stages(&self) -> impl Iterator<Item = &str> {
        self.records
            .iter()
            .filter(|r| r.is_completed())
            .map(|r| r.name.as_str())
    }
}
