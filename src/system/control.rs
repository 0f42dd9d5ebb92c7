use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::platform::{self, ControlBackend, OsFailure};
use crate::config::ControlConfig;
use crate::error::ControlError;

pub const NICE_MIN: i32 = -20;
pub const NICE_MAX: i32 = 19;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Graceful termination (SIGTERM).
    Terminate,
    /// Forced termination (SIGKILL).
    Kill,
    Interrupt,
    Hangup,
    /// Pause (SIGSTOP).
    Stop,
    /// Resume (SIGCONT).
    Continue,
}

impl SignalKind {
    pub fn name(self) -> &'static str {
        match self {
            SignalKind::Terminate => "SIGTERM",
            SignalKind::Kill => "SIGKILL",
            SignalKind::Interrupt => "SIGINT",
            SignalKind::Hangup => "SIGHUP",
            SignalKind::Stop => "SIGSTOP",
            SignalKind::Continue => "SIGCONT",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SignalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        match bare {
            "TERM" | "TERMINATE" | "15" => Ok(SignalKind::Terminate),
            "KILL" | "9" => Ok(SignalKind::Kill),
            "INT" | "INTERRUPT" | "2" => Ok(SignalKind::Interrupt),
            "HUP" | "HANGUP" | "1" => Ok(SignalKind::Hangup),
            "STOP" | "PAUSE" => Ok(SignalKind::Stop),
            "CONT" | "CONTINUE" | "RESUME" => Ok(SignalKind::Continue),
            _ => Err(format!("unknown signal `{s}`")),
        }
    }
}

/// Result of [`ProcessController::terminate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The process exited after SIGTERM.
    Graceful,
    /// The process outlived the grace period and was sent SIGKILL.
    Forced,
}

/// Executes control operations against live PIDs.
///
/// Operates on OS state directly and never touches the sampling cache, so it can be
/// called from any thread while a sampling cycle is in flight.
#[derive(Clone)]
pub struct ProcessController {
    backend: Arc<dyn ControlBackend>,
    privileged: bool,
    protect_critical: bool,
    critical_processes: Vec<String>,
    escalation_delay: Duration,
    self_pid: u32,
}

impl ProcessController {
    pub fn new(privileged: bool, config: &ControlConfig) -> Self {
        Self::with_backend(Arc::from(platform::default_backend()), privileged, config)
    }

    pub fn with_backend(
        backend: Arc<dyn ControlBackend>,
        privileged: bool,
        config: &ControlConfig,
    ) -> Self {
        ProcessController {
            backend,
            privileged,
            protect_critical: config.protect_critical,
            critical_processes: config.critical_processes.clone(),
            escalation_delay: Duration::from_millis(config.kill_escalation_ms),
            self_pid: std::process::id(),
        }
    }

    pub fn send_signal(&self, pid: u32, kind: SignalKind) -> Result<(), ControlError> {
        self.guard(pid)?;
        match self.backend.signal(pid, kind) {
            Ok(()) => {
                tracing::info!(pid, signal = kind.name(), "signal delivered");
                Ok(())
            }
            Err(err) => Err(self.reject(pid, "signal", err)),
        }
    }

    /// Sends SIGTERM, waits out the grace period, and sends SIGKILL if the PID survived.
    ///
    /// A zombie left behind by SIGTERM counts as exited: it is no longer running and
    /// only waits for its parent to reap it.
    pub async fn terminate(&self, pid: u32) -> Result<TerminateOutcome, ControlError> {
        self.send_signal(pid, SignalKind::Terminate)?;
        tokio::time::sleep(self.escalation_delay).await;

        if self.backend.probe(pid).is_err() || self.backend.is_zombie(pid) {
            return Ok(TerminateOutcome::Graceful);
        }
        match self.send_signal(pid, SignalKind::Kill) {
            Ok(()) => Ok(TerminateOutcome::Forced),
            // Exited between the probe and SIGKILL.
            Err(ControlError::NoSuchProcess(_)) => Ok(TerminateOutcome::Graceful),
            Err(err) => Err(err),
        }
    }

    pub fn nice(&self, pid: u32) -> Result<i32, ControlError> {
        self.backend
            .nice(pid)
            .map_err(|err| map_os_error(pid, "read priority of", err))
    }

    /// Sets an absolute nice value.
    ///
    /// Without elevated privilege only increases are attempted; a decrease fails with
    /// `PermissionDenied` before any system call. Rejections by the OS are surfaced
    /// unchanged and never retried.
    pub fn set_nice(&self, pid: u32, value: i32) -> Result<(), ControlError> {
        if !(NICE_MIN..=NICE_MAX).contains(&value) {
            return Err(ControlError::InvalidRange { value });
        }
        self.guard(pid)?;

        if !self.privileged {
            let current = self.nice(pid)?;
            if value < current {
                tracing::warn!(pid, current, requested = value, "renice needs privilege");
                return Err(ControlError::PermissionDenied { pid, op: "renice" });
            }
        }

        match self.backend.set_nice(pid, value) {
            Ok(()) => {
                tracing::info!(pid, nice = value, "priority changed");
                Ok(())
            }
            Err(err) => Err(self.reject(pid, "renice", err)),
        }
    }

    /// Applies `delta` to the current nice value and returns the new value.
    pub fn adjust_nice(&self, pid: u32, delta: i32) -> Result<i32, ControlError> {
        let target = self.nice(pid)?.saturating_add(delta);
        self.set_nice(pid, target)?;
        Ok(target)
    }

    /// True for commands a presentation layer should confirm before signalling.
    pub fn is_critical(&self, pid: u32, command: &str) -> bool {
        if pid == 1 {
            return true;
        }
        let base = command_base_name(command);
        !base.is_empty() && self.critical_processes.iter().any(|c| c == base)
    }

    fn guard(&self, pid: u32) -> Result<(), ControlError> {
        if !self.protect_critical {
            return Ok(());
        }
        if pid == 1 {
            return Err(ControlError::Protected {
                pid,
                reason: "init process",
            });
        }
        if pid == self.self_pid {
            return Err(ControlError::Protected {
                pid,
                reason: "own process",
            });
        }
        Ok(())
    }

    fn reject(&self, pid: u32, op: &'static str, err: io::Error) -> ControlError {
        let err = map_os_error(pid, op, err);
        tracing::warn!(pid, op, error = %err, "control operation rejected");
        err
    }
}

fn map_os_error(pid: u32, op: &'static str, err: io::Error) -> ControlError {
    match platform::classify_os_error(&err) {
        OsFailure::NoSuchProcess => ControlError::NoSuchProcess(pid),
        OsFailure::PermissionDenied => ControlError::PermissionDenied { pid, op },
        OsFailure::Other => ControlError::Os {
            pid,
            op,
            source: err,
        },
    }
}

/// `-bash`, `/usr/sbin/sshd -D` and `sshd` all reduce to the bare program name.
fn command_base_name(command: &str) -> &str {
    let first = command.split_whitespace().next().unwrap_or("");
    let first = first.strip_prefix('-').unwrap_or(first);
    let first = first.trim_start_matches('[').trim_end_matches(']');
    first.rsplit('/').next().unwrap_or(first)
}
