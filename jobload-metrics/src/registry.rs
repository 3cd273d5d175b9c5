use dashmap::DashMap;
use parking_lot::RwLock;

use crate::metrics::{MetricHandle, MetricKind, MetricSeriesSummary};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

#[derive(Debug)]
pub struct MetricDef {
    pub name: String,
    pub kind: MetricKind,
}

/// Per-run store of named metric series.
///
/// Shared between all virtual users behind an `Arc`; every write goes through
/// a [`MetricHandle`] so the hot path never touches the definition lock.
#[derive(Debug, Default)]
pub struct Registry {
    defs: RwLock<Vec<MetricDef>>,
    storage: DashMap<MetricId, MetricHandle>,
}

impl Registry {
    /// Registers `name` on first reference; later calls return the same id.
    ///
    /// Re-registering an existing name under a different kind is an error.
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricId> {
        if let Some(id) = self.lookup_checked(name, kind)? {
            return Ok(id);
        }

        let mut defs = self.defs.write();
        // Another writer may have won the race between the read and write lock.
        if let Some((idx, def)) = defs.iter().enumerate().find(|(_, d)| d.name == name) {
            return check_kind(def, kind).map(|()| MetricId(idx as u32));
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: name.to_string(),
            kind,
        });
        self.storage.insert(id, MetricHandle::new(kind));
        Ok(id)
    }

    /// Registers (if needed) and returns the write handle in one step.
    pub fn handle_for(&self, name: &str, kind: MetricKind) -> Result<MetricHandle> {
        let id = self.register(name, kind)?;
        Ok(self
            .storage
            .entry(id)
            .or_insert_with(|| MetricHandle::new(kind))
            .value()
            .clone())
    }

    pub fn lookup(&self, name: &str) -> Option<(MetricId, MetricKind)> {
        let defs = self.defs.read();
        defs.iter()
            .enumerate()
            .find(|(_, d)| d.name == name)
            .map(|(idx, d)| (MetricId(idx as u32), d.kind))
    }

    fn lookup_checked(&self, name: &str, kind: MetricKind) -> Result<Option<MetricId>> {
        let defs = self.defs.read();
        match defs.iter().enumerate().find(|(_, d)| d.name == name) {
            Some((idx, def)) => check_kind(def, kind).map(|()| Some(MetricId(idx as u32))),
            None => Ok(None),
        }
    }

    pub fn get_handle(&self, metric: MetricId) -> Option<MetricHandle> {
        self.storage.get(&metric).map(|h| h.value().clone())
    }

    pub fn len(&self) -> usize {
        self.defs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregates every series. Sorted by name.
    pub fn summarize(&self) -> Vec<MetricSeriesSummary> {
        let defs = self.defs.read();
        let mut out: Vec<MetricSeriesSummary> = defs
            .iter()
            .enumerate()
            .filter_map(|(idx, def)| {
                let handle = self.get_handle(MetricId(idx as u32))?;
                Some(MetricSeriesSummary {
                    name: def.name.clone(),
                    kind: def.kind,
                    values: handle.value(),
                })
            })
            .collect();

        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

fn check_kind(def: &MetricDef, requested: MetricKind) -> Result<()> {
    if def.kind == requested {
        Ok(())
    } else {
        Err(Error::KindMismatch {
            name: def.name.clone(),
            registered: def.kind,
            requested,
        })
    }
}
