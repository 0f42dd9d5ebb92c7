use std::time::{Instant, SystemTime};

use serde::Serialize;

/// Kernel scheduling state of a process, as reported by the state code in `stat`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ProcessState {
    Running,
    Sleeping,
    Waiting,
    Zombie,
    Stopped,
    TracingStop,
    Dead,
    Idle,
    Parked,
    Unknown,
}

impl ProcessState {
    pub fn from_code(code: char) -> Self {
        match code {
            'R' => ProcessState::Running,
            'S' => ProcessState::Sleeping,
            'D' | 'W' => ProcessState::Waiting,
            'Z' => ProcessState::Zombie,
            'T' => ProcessState::Stopped,
            't' => ProcessState::TracingStop,
            'X' | 'x' => ProcessState::Dead,
            'I' => ProcessState::Idle,
            'P' | 'K' => ProcessState::Parked,
            _ => ProcessState::Unknown,
        }
    }

    /// Single-letter code as printed by `ps`.
    pub fn code(self) -> char {
        match self {
            ProcessState::Running => 'R',
            ProcessState::Sleeping => 'S',
            ProcessState::Waiting => 'D',
            ProcessState::Zombie => 'Z',
            ProcessState::Stopped => 'T',
            ProcessState::TracingStop => 't',
            ProcessState::Dead => 'X',
            ProcessState::Idle => 'I',
            ProcessState::Parked => 'P',
            ProcessState::Unknown => '?',
        }
    }
}

/// One process as read from the OS, with no derived values.
#[derive(Clone, Debug, PartialEq)]
pub struct RawProcessSample {
    pub pid: u32,
    pub ppid: u32,
    /// Short name (`comm`).
    pub name: String,
    /// Full command line, empty for kernel threads and zombies.
    pub cmdline: String,
    pub state: ProcessState,
    pub utime_ticks: u64,
    pub stime_ticks: u64,
    pub virtual_bytes: u64,
    pub resident_bytes: u64,
    /// Memory locked into RAM (`VmLck`).
    pub locked_bytes: u64,
    pub nice: i32,
    pub tty_nr: i32,
    pub uid: u32,
    pub session: i32,
    pub pgrp: i32,
    /// Foreground process group of the controlling terminal (`tpgid`).
    pub tpgid: i32,
    pub num_threads: i64,
    /// Start time in clock ticks since boot. Together with the PID this identifies a process.
    pub start_ticks: u64,
    pub sampled_at: Instant,
}

impl RawProcessSample {
    pub fn cpu_ticks(&self) -> u64 {
        self.utime_ticks.saturating_add(self.stime_ticks)
    }

    /// True when both samples describe the same process incarnation.
    pub fn same_incarnation(&self, other: &RawProcessSample) -> bool {
        self.pid == other.pid && self.start_ticks == other.start_ticks
    }
}

/// Tick buckets from one `cpu` line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuTicks {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTicks {
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }

    pub fn busy_total(&self) -> u64 {
        self.total().saturating_sub(self.idle_total())
    }
}

/// Memory counters in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryCounters {
    pub total: u64,
    pub free: u64,
    pub available: u64,
    pub buffers: u64,
    pub cached: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

/// System-wide counters as read from the OS.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSystemSample {
    pub cpu_total: CpuTicks,
    pub per_core: Vec<CpuTicks>,
    pub memory: MemoryCounters,
    /// Kernel clock ticks per second (`USER_HZ`).
    pub clock_ticks_per_sec: u64,
    /// Distinct (physical id, core id) pairs, when the platform reports them.
    pub physical_cores: Option<usize>,
    /// Current clock of the first CPU in MHz.
    pub frequency_mhz: Option<f64>,
    /// Boot time as seconds since the Unix epoch.
    pub boot_time_secs: u64,
    pub sampled_at: Instant,
    pub wall_clock: SystemTime,
}

impl RawSystemSample {
    pub fn core_count(&self) -> usize {
        self.per_core.len().max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes_round_trip_for_ps_letters() {
        for code in ['R', 'S', 'D', 'Z', 'T', 't', 'X', 'I', 'P'] {
            assert_eq!(ProcessState::from_code(code).code(), code);
        }
        assert_eq!(ProcessState::from_code('W'), ProcessState::Waiting);
        assert_eq!(ProcessState::from_code('?'), ProcessState::Unknown);
    }

    #[test]
    fn cpu_ticks_split_idle_and_busy() {
        let ticks = CpuTicks {
            user: 10,
            nice: 2,
            system: 5,
            idle: 80,
            iowait: 3,
            irq: 0,
            softirq: 0,
            steal: 0,
        };
        assert_eq!(ticks.total(), 100);
        assert_eq!(ticks.idle_total(), 83);
        assert_eq!(ticks.busy_total(), 17);
    }
}
