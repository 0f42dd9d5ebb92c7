use std::collections::HashSet;
use std::path::Path;

use super::cache::PreviousSampleCache;
use super::derive;
use super::platform::{self, SampleSource};
use super::raw::{RawProcessSample, RawSystemSample};
use super::snapshot::SystemSnapshot;
use crate::error::SampleError;

/// Runs sampling cycles and owns the previous-sample cache between them.
pub struct Collector {
    source: Box<dyn SampleSource>,
    cache: PreviousSampleCache,
    cycle: u64,
}

impl Collector {
    pub fn new(proc_root: &Path) -> Self {
        Self::with_source(platform::default_source(proc_root))
    }

    pub fn with_source(source: Box<dyn SampleSource>) -> Self {
        Self::with_cache(source, PreviousSampleCache::new())
    }

    /// Starts from a prepared cache, e.g. one carried over from an earlier collector.
    pub fn with_cache(source: Box<dyn SampleSource>, cache: PreviousSampleCache) -> Self {
        Collector {
            source,
            cache,
            cycle: 0,
        }
    }

    pub fn cache(&self) -> &PreviousSampleCache {
        &self.cache
    }

    pub fn into_cache(self) -> PreviousSampleCache {
        self.cache
    }

    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Forgets every previous sample; the next cycle reports first-observation values.
    pub fn reset(&mut self) {
        self.cache.clear();
    }

    /// Runs one sampling cycle.
    ///
    /// System-wide read failures abort the cycle and leave the cache untouched.
    /// Processes that vanish or cannot be read are skipped for this cycle only.
    pub fn refresh(&mut self) -> Result<SystemSnapshot, SampleError> {
        let _refresh_span =
            tracing::debug_span!("collector.refresh", cycle = self.cycle + 1).entered();

        let system = self.source.read_system_raw()?;
        let pids = self.source.list_live_pids()?;

        let samples: Vec<RawProcessSample> = pids
            .into_iter()
            .filter_map(|pid| match self.source.read_process_raw(pid) {
                Ok(raw) => Some(raw),
                Err(SampleError::ProcessGone(_)) => {
                    tracing::debug!(pid, "process exited mid-cycle");
                    None
                }
                Err(err) => {
                    tracing::debug!(pid, error = %err, "skipping unreadable process");
                    None
                }
            })
            .collect();

        let snapshot = self.build_snapshot(&system, &samples);

        // Commit only after every read succeeded, so a failed cycle never leaves a
        // half-updated cache behind.
        let alive: HashSet<u32> = samples.iter().map(|s| s.pid).collect();
        let evicted = self.cache.evict_missing(&alive);
        if evicted > 0 {
            tracing::debug!(evicted, "evicted exited processes from cache");
        }
        for sample in samples {
            self.cache.record(sample);
        }
        self.cache.record_system(system);
        self.cycle += 1;

        Ok(snapshot)
    }

    fn build_snapshot(
        &self,
        system: &RawSystemSample,
        samples: &[RawProcessSample],
    ) -> SystemSnapshot {
        let _snapshot_span = tracing::debug_span!("collector.build_snapshot").entered();

        let previous_system = self.cache.system();
        let elapsed = previous_system
            .map(|prev| system.sampled_at.saturating_duration_since(prev.sampled_at));

        let mut processes: Vec<_> = samples
            .iter()
            .map(|raw| {
                let previous = self.cache.previous_for(raw);
                if previous.is_none() && self.cache.contains(raw.pid) {
                    tracing::debug!(pid = raw.pid, "pid reused since last cycle");
                }
                derive::derive_process(raw, previous, system, self.source.user_name(raw.uid))
            })
            .collect();
        processes.sort_unstable_by_key(|p| p.pid);

        SystemSnapshot {
            cycle: self.cycle + 1,
            timestamp: system.wall_clock,
            elapsed,
            cpu: derive::aggregate_cpu_percent(system, previous_system),
            memory: derive::memory_usage(&system.memory),
            processes,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant, SystemTime};

    use super::*;
    use crate::system::raw::{CpuTicks, MemoryCounters, ProcessState};

    /// Scripted OS state shared with the test so it can be changed between cycles.
    #[derive(Default)]
    struct World {
        processes: BTreeMap<u32, (u64, u64)>,
        vanishing: Vec<u32>,
        system_fails: bool,
        busy: u64,
        idle: u64,
        now: Option<Instant>,
    }

    struct ScriptedSource(Arc<Mutex<World>>);

    impl SampleSource for ScriptedSource {
        fn read_system_raw(&mut self) -> Result<RawSystemSample, SampleError> {
            let world = self.0.lock().unwrap();
            if world.system_fails {
                return Err(SampleError::io(
                    "/proc/stat",
                    std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                ));
            }
            let ticks = CpuTicks {
                user: world.busy,
                idle: world.idle,
                ..CpuTicks::default()
            };
            Ok(RawSystemSample {
                cpu_total: ticks,
                per_core: vec![ticks],
                memory: MemoryCounters {
                    total: 1000,
                    available: 500,
                    ..MemoryCounters::default()
                },
                clock_ticks_per_sec: 100,
                physical_cores: Some(1),
                frequency_mhz: Some(2400.0),
                boot_time_secs: 0,
                sampled_at: world.now.unwrap_or_else(Instant::now),
                wall_clock: SystemTime::now(),
            })
        }

        fn list_live_pids(&self) -> Result<Vec<u32>, SampleError> {
            let world = self.0.lock().unwrap();
            let mut pids: Vec<u32> = world.processes.keys().copied().collect();
            pids.extend(&world.vanishing);
            Ok(pids)
        }

        fn read_process_raw(&self, pid: u32) -> Result<RawProcessSample, SampleError> {
            let world = self.0.lock().unwrap();
            let (start_ticks, cpu_ticks) = *world
                .processes
                .get(&pid)
                .ok_or(SampleError::ProcessGone(pid))?;
            Ok(RawProcessSample {
                pid,
                ppid: 1,
                name: format!("p{pid}"),
                cmdline: format!("p{pid} --run"),
                state: ProcessState::Running,
                utime_ticks: cpu_ticks,
                stime_ticks: 0,
                virtual_bytes: 0,
                resident_bytes: 100,
                locked_bytes: 0,
                nice: 0,
                tty_nr: 0,
                uid: 0,
                session: 0,
                pgrp: 0,
                tpgid: -1,
                num_threads: 1,
                start_ticks,
                sampled_at: world.now.unwrap_or_else(Instant::now),
            })
        }
    }

    fn scripted(world: World) -> (Collector, Arc<Mutex<World>>) {
        let world = Arc::new(Mutex::new(world));
        let collector = Collector::with_source(Box::new(ScriptedSource(world.clone())));
        (collector, world)
    }

    fn world_with(processes: &[(u32, u64, u64)]) -> World {
        World {
            processes: processes.iter().map(|&(p, s, c)| (p, (s, c))).collect(),
            busy: 0,
            idle: 0,
            now: Some(Instant::now()),
            ..World::default()
        }
    }

    fn advance(world: &Arc<Mutex<World>>, secs: u64) {
        let mut w = world.lock().unwrap();
        w.now = w.now.map(|t| t + Duration::from_secs(secs));
    }

    #[test]
    fn second_cycle_derives_cpu_from_delta() {
        let (mut collector, world) = scripted(world_with(&[(10, 5, 0)]));
        let first = collector.refresh().unwrap();
        assert_eq!(first.process(10).unwrap().cpu_percent, 0.0);
        assert_eq!(first.elapsed, None);

        {
            let mut w = world.lock().unwrap();
            w.processes.insert(10, (5, 50));
            w.busy = 50;
            w.idle = 50;
        }
        advance(&world, 1);
        let second = collector.refresh().unwrap();
        assert!((second.process(10).unwrap().cpu_percent - 50.0).abs() < 1e-9);
        assert!((second.cpu.total_percent - 50.0).abs() < 1e-9);
        assert_eq!(second.elapsed, Some(Duration::from_secs(1)));
        assert_eq!(second.cycle, 2);
    }

    #[test]
    fn exited_process_is_evicted_and_absent() {
        let (mut collector, world) = scripted(world_with(&[(10, 5, 0), (11, 5, 0)]));
        collector.refresh().unwrap();
        assert!(collector.cache().contains(11));

        world.lock().unwrap().processes.remove(&11);
        advance(&world, 1);
        let snap = collector.refresh().unwrap();

        assert!(snap.process(11).is_none());
        assert!(!collector.cache().contains(11));
        assert!(collector.cache().contains(10));
    }

    #[test]
    fn reused_pid_is_treated_as_first_observation() {
        let (mut collector, world) = scripted(world_with(&[(10, 5, 100)]));
        collector.refresh().unwrap();

        world.lock().unwrap().processes.insert(10, (777, 180));
        advance(&world, 1);
        let snap = collector.refresh().unwrap();

        assert_eq!(snap.process(10).unwrap().cpu_percent, 0.0);
        assert_eq!(collector.cache().get(10).map(|s| s.start_ticks), Some(777));
    }

    #[test]
    fn vanished_between_list_and_read_is_skipped() {
        let mut world = world_with(&[(10, 5, 0)]);
        world.vanishing = vec![99];
        let (mut collector, _world) = scripted(world);

        let snap = collector.refresh().unwrap();
        assert_eq!(snap.processes.len(), 1);
        assert!(!collector.cache().contains(99));
    }

    #[test]
    fn system_failure_keeps_cache_and_cycle_count() {
        let (mut collector, world) = scripted(world_with(&[(10, 5, 0)]));
        collector.refresh().unwrap();

        world.lock().unwrap().system_fails = true;
        assert!(matches!(collector.refresh(), Err(SampleError::Io { .. })));
        assert_eq!(collector.cycles(), 1);
        assert!(collector.cache().contains(10));

        world.lock().unwrap().system_fails = false;
        assert_eq!(collector.refresh().unwrap().cycle, 2);
    }

    #[test]
    fn injected_cache_supplies_previous_samples() {
        let (mut seed, world) = scripted(world_with(&[(10, 5, 0)]));
        seed.refresh().unwrap();
        let cache = seed.into_cache();

        {
            let mut w = world.lock().unwrap();
            w.processes.insert(10, (5, 25));
        }
        advance(&world, 1);
        let mut collector = Collector::with_cache(Box::new(ScriptedSource(world.clone())), cache);
        let snap = collector.refresh().unwrap();
        assert!((snap.process(10).unwrap().cpu_percent - 25.0).abs() < 1e-9);
    }

    #[test]
    fn snapshot_is_ordered_by_pid() {
        let (mut collector, _world) = scripted(world_with(&[(30, 1, 0), (2, 1, 0), (17, 1, 0)]));
        let snap = collector.refresh().unwrap();
        let pids: Vec<u32> = snap.processes.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![2, 17, 30]);
        let by_pid: HashMap<u32, f64> = snap
            .processes
            .iter()
            .map(|p| (p.pid, p.mem_percent))
            .collect();
        assert_eq!(by_pid[&2], 10.0);
    }

    #[test]
    fn reset_clears_previous_samples() {
        let (mut collector, _world) = scripted(world_with(&[(10, 5, 0)]));
        collector.refresh().unwrap();
        collector.reset();
        assert!(collector.cache().is_empty());
        assert!(collector.cache().system().is_none());
    }
}
