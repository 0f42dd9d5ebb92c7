use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures while reading raw state from the OS.
#[derive(Debug, Error)]
pub enum SampleError {
    /// System-wide counters or the process list could not be read. Fatal to the cycle.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The process exited between enumeration and read.
    #[error("process {0} exited before it could be read")]
    ProcessGone(u32),

    #[error("malformed data in {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("raw sampling is not supported on this platform")]
    Unsupported,
}

impl SampleError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SampleError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SampleError::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Per-process failures that should skip the PID rather than abort the cycle.
    pub fn is_process_local(&self) -> bool {
        matches!(self, SampleError::ProcessGone(_) | SampleError::Parse { .. })
    }
}

/// Failures of signal delivery or priority changes.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("no such process: {0}")]
    NoSuchProcess(u32),

    #[error("permission denied: cannot {op} process {pid}")]
    PermissionDenied { pid: u32, op: &'static str },

    #[error("nice value {value} is outside the valid range -20..=19")]
    InvalidRange { value: i32 },

    #[error("refusing to touch process {pid}: {reason}")]
    Protected { pid: u32, reason: &'static str },

    #[error("{op} on process {pid} failed: {source}")]
    Os {
        pid: u32,
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("refresh interval must be greater than zero")]
    NonPositiveInterval,
}
