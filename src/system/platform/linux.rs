use std::collections::HashSet;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use sysinfo::Users;

use super::SampleSource;
use crate::error::SampleError;
use crate::system::raw::{
    CpuTicks, MemoryCounters, ProcessState, RawProcessSample, RawSystemSample,
};

const DEFAULT_CLOCK_TICKS: u64 = 100;
const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Reads raw samples from a procfs mount.
pub struct ProcfsSource {
    root: PathBuf,
    clock_ticks: u64,
    page_size: u64,
    users: Users,
}

impl ProcfsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ProcfsSource {
            root: root.into(),
            clock_ticks: sysconf_or(libc::_SC_CLK_TCK, DEFAULT_CLOCK_TICKS),
            page_size: sysconf_or(libc::_SC_PAGESIZE, DEFAULT_PAGE_SIZE),
            users: Users::new_with_refreshed_list(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_pid_file(&self, pid: u32, name: &str) -> Result<String, SampleError> {
        let path = self.root.join(pid.to_string()).join(name);
        fs::read_to_string(&path).map_err(|err| process_read_error(pid, path, err))
    }
}

fn sysconf_or(name: libc::c_int, fallback: u64) -> u64 {
    // SAFETY: sysconf has no preconditions and only reads configuration values.
    let value = unsafe { libc::sysconf(name) };
    if value > 0 { value as u64 } else { fallback }
}

/// A vanished PID shows up as ENOENT, or ESRCH when the process dies mid-read.
fn process_read_error(pid: u32, path: PathBuf, err: io::Error) -> SampleError {
    if err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(libc::ESRCH) {
        SampleError::ProcessGone(pid)
    } else {
        SampleError::io(path, err)
    }
}

impl SampleSource for ProcfsSource {
    fn read_system_raw(&mut self) -> Result<RawSystemSample, SampleError> {
        let stat_path = self.root.join("stat");
        let stat = fs::read_to_string(&stat_path).map_err(|e| SampleError::io(&stat_path, e))?;
        let cpu = parse_cpu_stat(&stat).ok_or_else(|| {
            SampleError::parse(&stat_path, "missing aggregate `cpu` line")
        })?;

        let meminfo_path = self.root.join("meminfo");
        let meminfo =
            fs::read_to_string(&meminfo_path).map_err(|e| SampleError::io(&meminfo_path, e))?;
        let memory = parse_meminfo(&meminfo)
            .ok_or_else(|| SampleError::parse(&meminfo_path, "missing MemTotal"))?;

        // cpuinfo only adds detail; a missing or unreadable file is not fatal.
        let cpuinfo = fs::read_to_string(self.root.join("cpuinfo"))
            .map(|contents| parse_cpuinfo(&contents))
            .unwrap_or_default();

        self.users.refresh();

        Ok(RawSystemSample {
            cpu_total: cpu.total,
            per_core: cpu.per_core,
            memory,
            clock_ticks_per_sec: self.clock_ticks,
            physical_cores: cpuinfo
                .physical_cores
                .or_else(sysinfo::System::physical_core_count),
            frequency_mhz: cpuinfo.frequency_mhz,
            boot_time_secs: cpu.boot_time.unwrap_or_else(sysinfo::System::boot_time),
            sampled_at: Instant::now(),
            wall_clock: SystemTime::now(),
        })
    }

    fn list_live_pids(&self) -> Result<Vec<u32>, SampleError> {
        let entries = fs::read_dir(&self.root).map_err(|e| SampleError::io(&self.root, e))?;
        let mut pids: Vec<u32> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn read_process_raw(&self, pid: u32) -> Result<RawProcessSample, SampleError> {
        let stat = self.read_pid_file(pid, "stat")?;
        let fields = parse_pid_stat(&stat).ok_or_else(|| {
            SampleError::parse(self.root.join(pid.to_string()).join("stat"), "truncated stat")
        })?;

        let dir = self.root.join(pid.to_string());
        let uid = fs::metadata(&dir)
            .map_err(|err| process_read_error(pid, dir, err))?
            .uid();

        // Kernel threads and zombies have an empty cmdline; that is not an error.
        let cmdline = match self.read_pid_file(pid, "cmdline") {
            Ok(raw) => normalize_cmdline(&raw),
            Err(SampleError::ProcessGone(pid)) => return Err(SampleError::ProcessGone(pid)),
            Err(_) => String::new(),
        };

        let locked_bytes = match self.read_pid_file(pid, "status") {
            Ok(status) => parse_locked_bytes(&status).unwrap_or(0),
            Err(SampleError::ProcessGone(pid)) => return Err(SampleError::ProcessGone(pid)),
            Err(_) => 0,
        };

        Ok(RawProcessSample {
            pid,
            ppid: fields.ppid,
            name: fields.comm,
            cmdline,
            state: ProcessState::from_code(fields.state),
            utime_ticks: fields.utime,
            stime_ticks: fields.stime,
            virtual_bytes: fields.vsize,
            resident_bytes: fields.rss_pages.max(0) as u64 * self.page_size,
            locked_bytes,
            nice: fields.nice,
            tty_nr: fields.tty_nr,
            uid,
            session: fields.session,
            pgrp: fields.pgrp,
            tpgid: fields.tpgid,
            num_threads: fields.num_threads,
            start_ticks: fields.starttime,
            sampled_at: Instant::now(),
        })
    }

    fn user_name(&self, uid: u32) -> Option<String> {
        self.users
            .list()
            .iter()
            .find(|user| **user.id() == uid)
            .map(|user| user.name().to_string())
    }
}

#[derive(Debug, PartialEq)]
pub(crate) struct CpuStat {
    pub total: CpuTicks,
    pub per_core: Vec<CpuTicks>,
    pub boot_time: Option<u64>,
}

pub(crate) fn parse_cpu_stat(contents: &str) -> Option<CpuStat> {
    let mut total = None;
    let mut per_core = Vec::new();
    let mut boot_time = None;

    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        let Some(label) = parts.next() else {
            continue;
        };
        if label == "cpu" {
            total = Some(parse_cpu_ticks(parts)?);
        } else if label.starts_with("cpu") && label[3..].bytes().all(|b| b.is_ascii_digit()) {
            per_core.push(parse_cpu_ticks(parts)?);
        } else if label == "btime" {
            boot_time = parts.next().and_then(|v| v.parse().ok());
        }
    }

    Some(CpuStat {
        total: total?,
        per_core,
        boot_time,
    })
}

fn parse_cpu_ticks<'a>(parts: impl Iterator<Item = &'a str>) -> Option<CpuTicks> {
    // Older kernels omit trailing buckets; missing ones read as zero.
    let mut values = [0u64; 8];
    let mut seen = 0;
    for (slot, raw) in values.iter_mut().zip(parts) {
        *slot = raw.parse().ok()?;
        seen += 1;
    }
    if seen < 4 {
        return None;
    }
    let [user, nice, system, idle, iowait, irq, softirq, steal] = values;
    Some(CpuTicks {
        user,
        nice,
        system,
        idle,
        iowait,
        irq,
        softirq,
        steal,
    })
}

pub(crate) fn parse_meminfo(contents: &str) -> Option<MemoryCounters> {
    let mut total = None;
    let mut free = 0;
    let mut available = None;
    let mut buffers = 0;
    let mut cached = 0;
    let mut reclaimable = 0;
    let mut swap_total = 0;
    let mut swap_free = 0;

    for line in contents.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(kib) = rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok())
        else {
            continue;
        };
        let bytes = kib * 1024;
        match key {
            "MemTotal" => total = Some(bytes),
            "MemFree" => free = bytes,
            "MemAvailable" => available = Some(bytes),
            "Buffers" => buffers = bytes,
            "Cached" => cached = bytes,
            "SReclaimable" => reclaimable = bytes,
            "SwapTotal" => swap_total = bytes,
            "SwapFree" => swap_free = bytes,
            _ => {}
        }
    }

    let total = total?;
    let available = available.unwrap_or(free + buffers + cached + reclaimable);
    Some(MemoryCounters {
        total,
        free,
        available: available.min(total),
        buffers,
        cached,
        swap_total,
        swap_free: swap_free.min(swap_total),
    })
}

#[derive(Debug, PartialEq)]
pub(crate) struct PidStat {
    pub comm: String,
    pub state: char,
    pub ppid: u32,
    pub pgrp: i32,
    pub session: i32,
    pub tty_nr: i32,
    pub tpgid: i32,
    pub utime: u64,
    pub stime: u64,
    pub nice: i32,
    pub num_threads: i64,
    pub starttime: u64,
    pub vsize: u64,
    pub rss_pages: i64,
}

pub(crate) fn parse_pid_stat(contents: &str) -> Option<PidStat> {
    // comm may contain spaces and parens, so split on the last `)`.
    let open = contents.find('(')?;
    let close = contents.rfind(')')?;
    if open >= close {
        return None;
    }
    let comm = contents[open + 1..close].to_string();
    let fields: Vec<&str> = contents[close + 1..].split_whitespace().collect();
    // Fields after comm: state(0) ppid(1) pgrp(2) session(3) tty_nr(4) tpgid(5)
    // flags(6) minflt(7) cminflt(8) majflt(9) cmajflt(10) utime(11) stime(12)
    // cutime(13) cstime(14) priority(15) nice(16) num_threads(17) itrealvalue(18)
    // starttime(19) vsize(20) rss(21)
    if fields.len() < 22 {
        return None;
    }
    Some(PidStat {
        comm,
        state: fields[0].chars().next()?,
        ppid: fields[1].parse().ok()?,
        pgrp: fields[2].parse().ok()?,
        session: fields[3].parse().ok()?,
        tty_nr: fields[4].parse().ok()?,
        tpgid: fields[5].parse().ok()?,
        utime: fields[11].parse().ok()?,
        stime: fields[12].parse().ok()?,
        nice: fields[16].parse().ok()?,
        num_threads: fields[17].parse().ok()?,
        starttime: fields[19].parse().ok()?,
        vsize: fields[20].parse().ok()?,
        rss_pages: fields[21].parse().ok()?,
    })
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct CpuInfo {
    pub physical_cores: Option<usize>,
    pub frequency_mhz: Option<f64>,
}

/// Physical cores are the distinct `(physical id, core id)` pairs; the frequency is
/// the first `cpu MHz` entry.
pub(crate) fn parse_cpuinfo(contents: &str) -> CpuInfo {
    let mut cores = HashSet::new();
    let mut physical_id = None;
    let mut core_id = None;
    let mut frequency_mhz = None;

    for line in contents.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "physical id" => physical_id = value.parse::<u32>().ok(),
            "core id" => core_id = value.parse::<u32>().ok(),
            "cpu MHz" if frequency_mhz.is_none() => frequency_mhz = value.parse::<f64>().ok(),
            _ => {}
        }
        if let (Some(physical), Some(core)) = (physical_id, core_id) {
            cores.insert((physical, core));
            physical_id = None;
            core_id = None;
        }
    }

    CpuInfo {
        physical_cores: (!cores.is_empty()).then_some(cores.len()),
        frequency_mhz,
    }
}

/// `VmLck` from `/proc/<pid>/status`, in bytes.
pub(crate) fn parse_locked_bytes(status: &str) -> Option<u64> {
    let rest = status.lines().find_map(|line| line.strip_prefix("VmLck:"))?;
    let kib: u64 = rest.split_whitespace().next()?.parse().ok()?;
    Some(kib * 1024)
}

fn normalize_cmdline(raw: &str) -> String {
    raw.split('\0')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
