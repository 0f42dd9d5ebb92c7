use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::collector::Collector;
use super::snapshot::SystemSnapshot;
use crate::error::SampleError;

const ERROR_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Sampling,
    /// Stop requested while a cycle was in flight; the cycle still finishes.
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    Tick,
    CycleFinished,
    StopRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    StartCycle,
    Ignore,
    Terminate,
}

/// Idle -> Sampling -> Idle, with Stopping/Stopped as the exit path. At most one cycle
/// is ever in flight and a stop never interrupts one.
#[derive(Debug)]
pub struct LoopStateMachine {
    state: LoopState,
}

impl Default for LoopStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopStateMachine {
    pub fn new() -> Self {
        LoopStateMachine {
            state: LoopState::Idle,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn handle(&mut self, event: LoopEvent) -> LoopAction {
        let (next, action) = match (self.state, event) {
            (LoopState::Idle, LoopEvent::Tick) => (LoopState::Sampling, LoopAction::StartCycle),
            (LoopState::Idle, LoopEvent::StopRequested) => {
                (LoopState::Stopped, LoopAction::Terminate)
            }
            (LoopState::Sampling, LoopEvent::CycleFinished) => {
                (LoopState::Idle, LoopAction::Ignore)
            }
            (LoopState::Sampling, LoopEvent::StopRequested) => {
                (LoopState::Stopping, LoopAction::Ignore)
            }
            (LoopState::Stopping, LoopEvent::CycleFinished) => {
                (LoopState::Stopped, LoopAction::Terminate)
            }
            (LoopState::Stopped, _) => (LoopState::Stopped, LoopAction::Terminate),
            // Overlapping ticks and stray completions change nothing.
            (state, _) => (state, LoopAction::Ignore),
        };
        self.state = next;
        action
    }
}

/// Handle to a running update loop.
pub struct UpdateLoopHandle {
    snapshots: watch::Receiver<Option<Arc<SystemSnapshot>>>,
    errors: Option<mpsc::Receiver<SampleError>>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<Option<Collector>>,
}

impl UpdateLoopHandle {
    /// Receiver that always holds the most recent snapshot.
    pub fn snapshots(&self) -> watch::Receiver<Option<Arc<SystemSnapshot>>> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> Option<Arc<SystemSnapshot>> {
        self.snapshots.borrow().clone()
    }

    /// Cycle-fatal errors, for user-visible reporting. Can be taken once.
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<SampleError>> {
        self.errors.take()
    }

    /// Requests a stop, waits for the in-flight cycle to finish, and returns the
    /// collector with its cache intact.
    pub async fn stop(self) -> Option<Collector> {
        let _ = self.stop_tx.send(true);
        match self.task.await {
            Ok(collector) => collector,
            Err(err) => {
                tracing::error!(error = %err, "update loop task failed");
                None
            }
        }
    }
}

/// Starts sampling every `interval` on the current tokio runtime. The first cycle
/// runs immediately.
pub fn spawn_update_loop(collector: Collector, interval: Duration) -> UpdateLoopHandle {
    let (snapshot_tx, snapshot_rx) = watch::channel(None);
    let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
    let (stop_tx, stop_rx) = watch::channel(false);

    let task = tokio::spawn(run_update_loop(
        collector,
        interval,
        snapshot_tx,
        error_tx,
        stop_rx,
    ));

    UpdateLoopHandle {
        snapshots: snapshot_rx,
        errors: Some(error_rx),
        stop_tx,
        task,
    }
}

async fn run_update_loop(
    mut collector: Collector,
    interval: Duration,
    snapshot_tx: watch::Sender<Option<Arc<SystemSnapshot>>>,
    error_tx: mpsc::Sender<SampleError>,
    mut stop_rx: watch::Receiver<bool>,
) -> Option<Collector> {
    let mut machine = LoopStateMachine::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stop_seen = false;

    tracing::info!(interval_ms = interval.as_millis() as u64, "update loop started");

    loop {
        let event = tokio::select! {
            biased;
            _ = stop_rx.changed(), if !stop_seen => {
                stop_seen = true;
                LoopEvent::StopRequested
            }
            _ = ticker.tick() => LoopEvent::Tick,
        };

        match machine.handle(event) {
            LoopAction::Terminate => break,
            LoopAction::Ignore => continue,
            LoopAction::StartCycle => {}
        }

        let mut cycle = tokio::task::spawn_blocking(move || run_cycle(collector));
        let joined = loop {
            tokio::select! {
                joined = &mut cycle => break joined,
                _ = stop_rx.changed(), if !stop_seen => {
                    stop_seen = true;
                    machine.handle(LoopEvent::StopRequested);
                }
            }
        };

        let (returned, outcome) = match joined {
            Ok(pair) => pair,
            Err(err) => {
                tracing::error!(error = %err, "sampling task was cancelled");
                return None;
            }
        };
        collector = returned;

        match outcome {
            Some(Ok(snapshot)) => {
                snapshot_tx.send_replace(Some(Arc::new(snapshot)));
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, "sampling cycle failed; keeping last snapshot");
                if let Err(mpsc::error::TrySendError::Full(_)) = error_tx.try_send(err) {
                    tracing::warn!("error channel full, dropping cycle error");
                }
            }
            None => {}
        }

        if machine.handle(LoopEvent::CycleFinished) == LoopAction::Terminate {
            break;
        }
    }

    tracing::info!(cycles = collector.cycles(), "update loop stopped");
    Some(collector)
}

/// Runs one cycle on a blocking thread. A panic is contained here: the cache is
/// dropped so a half-finished cycle can never feed the next one.
fn run_cycle(
    mut collector: Collector,
) -> (Collector, Option<Result<SystemSnapshot, SampleError>>) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| collector.refresh()));
    match outcome {
        Ok(result) => (collector, Some(result)),
        Err(_) => {
            tracing::error!("sampling cycle panicked; resetting sample cache");
            collector.reset();
            (collector, None)
        }
    }
}
