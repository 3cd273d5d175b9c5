use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::config::StageTiming;
use crate::observation::{ObservationSet, StageRecord, StageStatus, TerminalStatus};

const DATA_PREFIX: &str = "data:";
const DONE_STAGE: &str = "done";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Started,
    Completed,
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One `data:` record as emitted by the pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStageEvent {
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub status: EventStatus,
    /// Seconds since the epoch.
    #[serde(default)]
    pub ts: Option<f64>,
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

impl RawStageEvent {
    pub fn name(&self) -> Option<&str> {
        self.stage
            .as_deref()
            .or(self.step.as_deref())
            .filter(|s| !s.is_empty())
    }

    pub fn is_terminal(&self) -> bool {
        self.status == EventStatus::Failed || self.name() == Some(DONE_STAGE)
    }
}

fn data_payload(line: &str) -> Option<&str> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();
    (!payload.is_empty()).then_some(payload)
}

fn secs(delta: f64) -> Duration {
    Duration::try_from_secs_f64(delta.max(0.0)).unwrap_or(Duration::ZERO)
}

/// Parses a (possibly partial) event stream body into an observation set.
///
/// `reference` is the stream-open time in epoch seconds. Only `data:` lines are
/// considered; undecodable or unnamed records are counted in `discarded_lines`.
pub fn parse_events(body: &str, reference: f64, timing: StageTiming) -> ObservationSet {
    let mut out = ObservationSet::default();
    let mut events: Vec<RawStageEvent> = Vec::new();

    for line in body.lines() {
        let Some(payload) = data_payload(line) else {
            continue;
        };
        match serde_json::from_str::<RawStageEvent>(payload) {
            Ok(ev) if ev.name().is_some() => {
                if out.time_to_first_event.is_none()
                    && events.is_empty()
                    && let Some(ts) = ev.ts
                {
                    out.time_to_first_event = Some(secs(ts - reference));
                }
                events.push(ev);
            }
            _ => out.discarded_lines += 1,
        }
    }

    out.events_total = events.len() as u64;
    if !events.is_empty() && events.iter().all(|ev| ev.seq.is_some()) {
        events.sort_by_key(|ev| ev.seq);
    }

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut last_completed_at: Option<f64> = None;

    for ev in events {
        let Some(name) = ev.name() else {
            continue;
        };

        if ev.status == EventStatus::Failed {
            out.terminal = Some(TerminalStatus::Failed);
        }
        if name == DONE_STAGE {
            if out.terminal.is_none() {
                out.terminal = Some(TerminalStatus::Completed);
            }
            continue;
        }
        if ev.status == EventStatus::Unknown {
            continue;
        }

        let idx = *index.entry(name.to_string()).or_insert_with(|| {
            out.records.push(StageRecord::pending(name));
            out.records.len() - 1
        });
        let record = &mut out.records[idx];

        match (ev.status, record.status) {
            (EventStatus::Started, StageStatus::Pending) => {
                record.status = StageStatus::Started;
                record.started_at = ev.ts;
            }
            (EventStatus::Completed, StageStatus::Completed) => out.duplicates += 1,
            (EventStatus::Completed, _) => {
                record.status = StageStatus::Completed;
                record.completed_at = ev.ts;
                record.payload = ev.result;

                if let Some(done) = ev.ts {
                    let paired = record.started_at.map(|s| secs(done - s));
                    let previous = last_completed_at.or(record.started_at).unwrap_or(reference);
                    let successive = secs(done - previous);
                    record.duration = match timing {
                        StageTiming::Paired => paired,
                        StageTiming::Successive => Some(successive),
                        StageTiming::PairedWithFallback => paired.or(Some(successive)),
                    };
                    last_completed_at = Some(done);
                }
            }
            // Started twice, or started after completion: transitions never go back.
            _ => {}
        }
    }

    out
}

/// Reassembles lines from arbitrarily split body chunks.
///
/// Produces exactly the text a single bulk read would have, so
/// incremental and bulk parsing agree.
#[derive(Debug, Default)]
pub struct LineAccumulator {
    partial: Vec<u8>,
    text: String,
    data_lines: u64,
    terminal: bool,
}

impl LineAccumulator {
    /// Feeds one chunk; returns how many complete `data:` lines it finished.
    pub fn push(&mut self, chunk: &[u8]) -> u64 {
        let before = self.data_lines;
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (head, tail) = rest.split_at(pos + 1);
            self.partial.extend_from_slice(head);
            let line = std::mem::take(&mut self.partial);
            self.complete_line(&line);
            rest = tail;
        }
        self.partial.extend_from_slice(rest);
        self.data_lines - before
    }

    fn complete_line(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        if let Some(payload) = data_payload(line.trim_end_matches('\n')) {
            self.data_lines += 1;
            if serde_json::from_str::<RawStageEvent>(payload).is_ok_and(|ev| ev.is_terminal()) {
                self.terminal = true;
            }
        }
        self.text.push_str(&line);
    }

    /// A `done` marker or a failed event has been received.
    pub fn saw_terminal(&self) -> bool {
        self.terminal
    }

    pub fn data_lines(&self) -> u64 {
        self.data_lines
    }

    /// Text received so far, including a trailing unterminated line.
    pub fn finish(mut self) -> String {
        if !self.partial.is_empty() {
            let tail = std::mem::take(&mut self.partial);
            self.complete_line(&tail);
        }
        self.text
    }
}
