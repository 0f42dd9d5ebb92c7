use std::collections::{HashMap, HashSet};

use super::raw::{RawProcessSample, RawSystemSample};

/// Raw samples from the previous cycle, keyed by PID.
///
/// Owned by a single [`Collector`](super::collector::Collector); nothing else reads or
/// writes it, so it needs no locking.
#[derive(Debug, Default)]
pub struct PreviousSampleCache {
    processes: HashMap<u32, RawProcessSample>,
    system: Option<RawSystemSample>,
}

impl PreviousSampleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Previous sample for the same process incarnation. A cached entry whose start
    /// time differs belongs to an earlier process that held this PID and is ignored.
    pub fn previous_for(&self, current: &RawProcessSample) -> Option<&RawProcessSample> {
        self.processes
            .get(&current.pid)
            .filter(|prev| prev.same_incarnation(current))
    }

    pub fn get(&self, pid: u32) -> Option<&RawProcessSample> {
        self.processes.get(&pid)
    }

    pub fn system(&self) -> Option<&RawSystemSample> {
        self.system.as_ref()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.processes.contains_key(&pid)
    }

    /// Inserts or replaces one process sample.
    pub fn record(&mut self, sample: RawProcessSample) {
        self.processes.insert(sample.pid, sample);
    }

    pub fn record_system(&mut self, sample: RawSystemSample) {
        self.system = Some(sample);
    }

    /// Drops entries for PIDs not in `alive`. Returns how many were evicted.
    pub fn evict_missing(&mut self, alive: &HashSet<u32>) -> usize {
        let before = self.processes.len();
        self.processes.retain(|pid, _| alive.contains(pid));
        before - self.processes.len()
    }

    pub fn clear(&mut self) {
        self.processes.clear();
        self.system = None;
    }
}
