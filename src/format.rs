use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::system::snapshot::{DerivedProcessMetric, SortKey, SystemSnapshot};

pub fn truncate_unicode(s: &str, max_width: usize) -> String {
    if s.width() <= max_width {
        return s.to_string();
    }
    let mut result = String::new();
    let mut width = 0;
    for ch in s.chars() {
        let ch_width = ch.width().unwrap_or(0);
        if width + ch_width > max_width.saturating_sub(1) {
            result.push('\u{2026}');
            break;
        }
        result.push(ch);
        width += ch_width;
    }
    result
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.0} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// VSZ/RSS columns are reported in KiB.
pub fn format_kib(bytes: u64) -> String {
    (bytes / 1024).to_string()
}

/// `M:SS`, `H:MM:SS` past an hour, `D-HH:MM:SS` past a day.
pub fn format_cpu_time(time: Duration) -> String {
    let total = time.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if days > 0 {
        format!("{days}-{hours:02}:{minutes:02}:{seconds:02}")
    } else if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// START column relative to `now`: `HH:MM` today, `MonDD` this year, else the year.
pub fn format_start<Tz>(start_epoch_secs: u64, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let Some(start) = i64::try_from(start_epoch_secs)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    else {
        return "?".to_string();
    };
    let start = start.with_timezone(&now.timezone());

    if start.date_naive() == now.date_naive() {
        start.format("%H:%M").to_string()
    } else if start.year() == now.year() {
        start.format("%b%d").to_string()
    } else {
        start.format("%Y").to_string()
    }
}

pub const TABLE_HEADER: &str =
    "USER         PID  %CPU %MEM    VSZ   RSS TTY      STAT  NI START   TIME COMMAND";

/// One ps-aux style row; the command is cut to `command_width` display columns.
pub fn format_process_row<Tz>(
    process: &DerivedProcessMetric,
    now: &DateTime<Tz>,
    command_width: usize,
) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!(
        "{:<8} {:>7} {:>5.1} {:>4.1} {:>6} {:>5} {:<8} {:<5} {:>3} {:>5} {:>6} {}",
        truncate_unicode(&process.user, 8),
        process.pid,
        process.cpu_percent,
        process.mem_percent,
        format_kib(process.virtual_bytes),
        format_kib(process.resident_bytes),
        process.tty,
        process.stat,
        process.nice,
        format_start(process.start_epoch_secs, now),
        format_cpu_time(process.cpu_time),
        truncate_unicode(&process.command, command_width),
    )
}

/// Two summary lines: CPU load with topology, then memory/swap usage.
pub fn format_summary(snapshot: &SystemSnapshot, sort: SortKey) -> String {
    let cpu = &snapshot.cpu;
    let mut topology = format!("{} cores", snapshot.core_count());
    if let Some(physical) = cpu.physical_cores {
        topology.push_str(&format!(", {physical} physical"));
    }
    if let Some(mhz) = cpu.frequency_mhz {
        topology.push_str(&format!(", {mhz:.0} MHz"));
    }

    let mem = &snapshot.memory;
    format!(
        "CPU: {:>5.1}% ({topology})  tasks: {}  sort: {}\n\
         Mem: {} / {} ({:.1}%)  Swap: {} / {} ({:.1}%)",
        cpu.total_percent,
        snapshot.processes.len(),
        sort.label(),
        format_bytes(mem.used),
        format_bytes(mem.total),
        mem.percent,
        format_bytes(mem.swap_used),
        format_bytes(mem.swap_total),
        mem.swap_percent,
    )
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::system::raw::ProcessState;
    use crate::system::snapshot::{CpuUsage, MemoryUsage};

    #[test]
    fn bytes_pick_the_largest_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024 / 2), "1.5 GB");
    }

    #[test]
    fn truncation_respects_display_width() {
        assert_eq!(truncate_unicode("short", 10), "short");
        assert_eq!(truncate_unicode("abcdefgh", 5), "abcd\u{2026}");
        assert_eq!(truncate_unicode("日本語テキスト", 5), "日本\u{2026}");
    }

    #[test]
    fn cpu_time_formats() {
        assert_eq!(format_cpu_time(Duration::from_secs(0)), "0:00");
        assert_eq!(format_cpu_time(Duration::from_secs(75)), "1:15");
        assert_eq!(format_cpu_time(Duration::from_secs(3 * 3600 + 5)), "3:00:05");
        assert_eq!(
            format_cpu_time(Duration::from_secs(2 * 86_400 + 3661)),
            "2-01:01:01"
        );
    }

    #[test]
    fn start_column_depends_on_age() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 18, 0, 0).unwrap();
        let today = Utc.with_ymd_and_hms(2024, 6, 15, 9, 30, 0).unwrap();
        let this_year = Utc.with_ymd_and_hms(2024, 3, 2, 9, 30, 0).unwrap();
        let last_year = Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap();

        assert_eq!(format_start(today.timestamp() as u64, &now), "09:30");
        assert_eq!(format_start(this_year.timestamp() as u64, &now), "Mar02");
        assert_eq!(format_start(last_year.timestamp() as u64, &now), "2023");
        assert_eq!(format_start(u64::MAX, &now), "?");
    }

    #[test]
    fn process_row_has_every_column() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 18, 0, 0).unwrap();
        let process = DerivedProcessMetric {
            pid: 4242,
            ppid: 1,
            user: "postgres".into(),
            cpu_percent: 12.5,
            mem_percent: 3.3,
            virtual_bytes: 2048 * 1024,
            resident_bytes: 512 * 1024,
            tty: "pts/0".into(),
            state: ProcessState::Sleeping,
            stat: "Ss".into(),
            nice: 0,
            num_threads: 1,
            start_epoch_secs: Utc
                .with_ymd_and_hms(2024, 6, 15, 8, 5, 0)
                .unwrap()
                .timestamp() as u64,
            cpu_time: Duration::from_secs(95),
            name: "postgres".into(),
            command: "postgres -D /var/lib/postgresql/data".into(),
        };

        let row = format_process_row(&process, &now, 20);
        let columns: Vec<&str> = row.split_whitespace().collect();
        assert_eq!(
            columns,
            vec![
                "postgres",
                "4242",
                "12.5",
                "3.3",
                "2048",
                "512",
                "pts/0",
                "Ss",
                "0",
                "08:05",
                "1:35",
                "postgres",
                "-D",
                "/var/li\u{2026}",
            ]
        );
    }

    #[test]
    fn summary_shows_topology_and_sort_order() {
        let mut snapshot = SystemSnapshot {
            cycle: 2,
            timestamp: SystemTime::UNIX_EPOCH,
            elapsed: None,
            cpu: CpuUsage {
                total_percent: 37.5,
                per_core_percent: vec![25.0, 50.0, 25.0, 50.0],
                physical_cores: Some(2),
                frequency_mhz: Some(2893.2),
            },
            memory: MemoryUsage {
                total: 8 * 1024 * 1024 * 1024,
                used: 2 * 1024 * 1024 * 1024,
                percent: 25.0,
                ..MemoryUsage::default()
            },
            processes: Vec::new(),
        };

        let summary = format_summary(&snapshot, SortKey::Memory);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(
            lines[0],
            "CPU:  37.5% (4 cores, 2 physical, 2893 MHz)  tasks: 0  sort: Memory"
        );
        assert_eq!(lines[1], "Mem: 2.0 GB / 8.0 GB (25.0%)  Swap: 0 B / 0 B (0.0%)");

        snapshot.cpu.physical_cores = None;
        snapshot.cpu.frequency_mhz = None;
        let summary = format_summary(&snapshot, SortKey::Cpu);
        assert!(summary.starts_with("CPU:  37.5% (4 cores)  tasks: 0  sort: CPU\n"));
    }
}
