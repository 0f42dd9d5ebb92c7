use std::cmp::Ordering;
use std::time::{Duration, SystemTime};

use serde::Serialize;

use super::raw::ProcessState;

/// Display-ready metrics for one live process.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DerivedProcessMetric {
    pub pid: u32,
    pub ppid: u32,
    pub user: String,
    /// Share of one core, so values up to `100 * cores` are possible.
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub virtual_bytes: u64,
    pub resident_bytes: u64,
    pub tty: String,
    pub state: ProcessState,
    /// ps-style STAT column: state letter plus modifier flags.
    pub stat: String,
    pub nice: i32,
    pub num_threads: i64,
    /// Process start as seconds since the Unix epoch.
    pub start_epoch_secs: u64,
    /// Accumulated user+system CPU time.
    pub cpu_time: Duration,
    pub name: String,
    pub command: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CpuUsage {
    pub total_percent: f64,
    pub per_core_percent: Vec<f64>,
    pub physical_cores: Option<usize>,
    pub frequency_mhz: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub free: u64,
    pub buffers: u64,
    pub cached: u64,
    pub percent: f64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub swap_free: u64,
    pub swap_percent: f64,
}

/// Result of one sampling cycle. Never mutated after the collector hands it out.
#[derive(Clone, Debug, Serialize)]
pub struct SystemSnapshot {
    pub cycle: u64,
    pub timestamp: SystemTime,
    /// Wall time since the previous cycle, absent on the first one.
    pub elapsed: Option<Duration>,
    pub cpu: CpuUsage,
    pub memory: MemoryUsage,
    /// Ordered by PID.
    pub processes: Vec<DerivedProcessMetric>,
}

impl SystemSnapshot {
    pub fn process(&self, pid: u32) -> Option<&DerivedProcessMetric> {
        self.processes
            .binary_search_by_key(&pid, |p| p.pid)
            .ok()
            .map(|idx| &self.processes[idx])
    }

    pub fn core_count(&self) -> usize {
        self.cpu.per_core_percent.len().max(1)
    }

    pub fn sorted(&self, key: SortKey) -> Vec<&DerivedProcessMetric> {
        let mut rows: Vec<&DerivedProcessMetric> = self.processes.iter().collect();
        rows.sort_by(|a, b| key.compare(a, b));
        rows
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Cpu,
    Memory,
    Pid,
    Name,
    Nice,
}

impl SortKey {
    pub fn label(self) -> &'static str {
        match self {
            SortKey::Cpu => "CPU",
            SortKey::Memory => "Memory",
            SortKey::Pid => "PID",
            SortKey::Name => "Name",
            SortKey::Nice => "Nice",
        }
    }

    pub fn from_str_config(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "mem" | "memory" => SortKey::Memory,
            "pid" => SortKey::Pid,
            "name" | "command" => SortKey::Name,
            "nice" => SortKey::Nice,
            _ => SortKey::Cpu,
        }
    }

    /// Usage columns sort descending, identity columns ascending. Ties fall back to PID.
    fn compare(self, a: &DerivedProcessMetric, b: &DerivedProcessMetric) -> Ordering {
        let primary = match self {
            SortKey::Cpu => b.cpu_percent.total_cmp(&a.cpu_percent),
            SortKey::Memory => b.mem_percent.total_cmp(&a.mem_percent),
            SortKey::Pid => Ordering::Equal,
            SortKey::Name => a.command.cmp(&b.command),
            SortKey::Nice => a.nice.cmp(&b.nice),
        };
        primary.then(a.pid.cmp(&b.pid))
    }
}
