//! Pure metric derivation: no I/O and no shared state.

use std::time::Duration;

use super::raw::{CpuTicks, MemoryCounters, ProcessState, RawProcessSample, RawSystemSample};
use super::snapshot::{CpuUsage, DerivedProcessMetric, MemoryUsage};

/// CPU% of one process between two samples, as a share of one core.
///
/// Returns 0 when there is no previous sample, when the previous sample belongs to an
/// earlier process that held the same PID, or when no wall time has passed.
pub fn cpu_percent(
    current: &RawProcessSample,
    previous: Option<&RawProcessSample>,
    elapsed: Duration,
    clock_ticks_per_sec: u64,
    core_count: usize,
) -> f64 {
    let Some(previous) = previous else {
        return 0.0;
    };
    if !current.same_incarnation(previous) || elapsed.is_zero() || clock_ticks_per_sec == 0 {
        return 0.0;
    }
    let process_ticks = current.cpu_ticks().saturating_sub(previous.cpu_ticks()) as f64;
    let wall_ticks = elapsed.as_secs_f64() * clock_ticks_per_sec as f64;
    let percent = process_ticks / wall_ticks * 100.0;
    clamp_percent(percent, 100.0 * core_count.max(1) as f64)
}

/// Resident memory as a percentage of total system memory.
pub fn mem_percent(resident_bytes: u64, total_bytes: u64) -> f64 {
    if total_bytes == 0 {
        return 0.0;
    }
    clamp_percent(resident_bytes as f64 / total_bytes as f64 * 100.0, 100.0)
}

/// Busy share of the ticks that elapsed between two readings of one `cpu` line.
pub fn ticks_percent(current: &CpuTicks, previous: &CpuTicks) -> f64 {
    let total = current.total().saturating_sub(previous.total());
    if total == 0 {
        return 0.0;
    }
    let idle = current.idle_total().saturating_sub(previous.idle_total());
    let busy = total.saturating_sub(idle);
    clamp_percent(busy as f64 / total as f64 * 100.0, 100.0)
}

/// Overall and per-core CPU%. Without a previous reading every value is 0.
pub fn aggregate_cpu_percent(
    current: &RawSystemSample,
    previous: Option<&RawSystemSample>,
) -> CpuUsage {
    let Some(previous) = previous else {
        return CpuUsage {
            total_percent: 0.0,
            per_core_percent: vec![0.0; current.per_core.len()],
            physical_cores: current.physical_cores,
            frequency_mhz: current.frequency_mhz,
        };
    };
    // Cores that came online since the last reading have no baseline yet.
    let per_core_percent = current
        .per_core
        .iter()
        .enumerate()
        .map(|(idx, ticks)| {
            previous
                .per_core
                .get(idx)
                .map_or(0.0, |prev| ticks_percent(ticks, prev))
        })
        .collect();
    CpuUsage {
        total_percent: ticks_percent(&current.cpu_total, &previous.cpu_total),
        per_core_percent,
        physical_cores: current.physical_cores,
        frequency_mhz: current.frequency_mhz,
    }
}

pub fn memory_usage(counters: &MemoryCounters) -> MemoryUsage {
    let used = counters.total.saturating_sub(counters.available);
    let swap_used = counters.swap_total.saturating_sub(counters.swap_free);
    MemoryUsage {
        total: counters.total,
        available: counters.available,
        used,
        free: counters.free,
        buffers: counters.buffers,
        cached: counters.cached,
        percent: mem_percent(used, counters.total),
        swap_total: counters.swap_total,
        swap_used,
        swap_free: counters.swap_free,
        swap_percent: mem_percent(swap_used, counters.swap_total),
    }
}

/// Builds the display-ready record for one process.
pub fn derive_process(
    current: &RawProcessSample,
    previous: Option<&RawProcessSample>,
    system: &RawSystemSample,
    user: Option<String>,
) -> DerivedProcessMetric {
    let elapsed = previous.map_or(Duration::ZERO, |prev| {
        current.sampled_at.saturating_duration_since(prev.sampled_at)
    });
    let hz = system.clock_ticks_per_sec.max(1);

    DerivedProcessMetric {
        pid: current.pid,
        ppid: current.ppid,
        user: user.unwrap_or_else(|| current.uid.to_string()),
        cpu_percent: cpu_percent(current, previous, elapsed, hz, system.core_count()),
        mem_percent: mem_percent(current.resident_bytes, system.memory.total),
        virtual_bytes: current.virtual_bytes,
        resident_bytes: current.resident_bytes,
        tty: tty_name(current.tty_nr),
        state: current.state,
        stat: stat_flags(current),
        nice: current.nice,
        num_threads: current.num_threads,
        start_epoch_secs: system.boot_time_secs + current.start_ticks / hz,
        cpu_time: ticks_to_duration(current.cpu_ticks(), hz),
        name: current.name.clone(),
        command: display_command(current),
    }
}

fn clamp_percent(value: f64, upper: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, upper)
}

fn ticks_to_duration(ticks: u64, hz: u64) -> Duration {
    let secs = ticks / hz;
    let nanos = (ticks % hz) * 1_000_000_000 / hz;
    Duration::new(secs, nanos as u32)
}

/// Decodes `tty_nr` into a device name; `?` when there is no controlling terminal.
pub fn tty_name(tty_nr: i32) -> String {
    if tty_nr <= 0 {
        return "?".to_string();
    }
    let nr = tty_nr as u32;
    let major = (nr >> 8) & 0xfff;
    let minor = (nr & 0xff) | ((nr >> 12) & 0xfff00);
    match major {
        4 if minor < 64 => format!("tty{minor}"),
        4 => format!("ttyS{}", minor - 64),
        136..=143 => format!("pts/{}", (major - 136) * 256 + minor),
        _ => "?".to_string(),
    }
}

/// ps-style STAT: base state, `<`/`N` for priority, `L` for pages locked in memory,
/// `s` for a session leader, `l` when multi-threaded, `+` in the foreground group.
pub fn stat_flags(raw: &RawProcessSample) -> String {
    let mut stat = String::with_capacity(5);
    stat.push(raw.state.code());
    if raw.nice < 0 {
        stat.push('<');
    } else if raw.nice > 0 {
        stat.push('N');
    }
    if raw.locked_bytes > 0 {
        stat.push('L');
    }
    if raw.session > 0 && raw.session as u32 == raw.pid {
        stat.push('s');
    }
    if raw.num_threads > 1 {
        stat.push('l');
    }
    if raw.tty_nr > 0 && raw.tpgid > 0 && raw.tpgid == raw.pgrp {
        stat.push('+');
    }
    stat
}

/// Command line, or a bracketed placeholder for kernel threads and zombies.
pub fn display_command(raw: &RawProcessSample) -> String {
    if !raw.cmdline.is_empty() {
        return raw.cmdline.clone();
    }
    match raw.state {
        ProcessState::Zombie => "[zombie]".to_string(),
        _ if raw.name.is_empty() => format!("[kernel {}]", raw.pid),
        _ => format!("[{}]", raw.name),
    }
}
