use std::io;
use std::path::Path;

use crate::error::SampleError;
use crate::system::control::SignalKind;
use crate::system::raw::{RawProcessSample, RawSystemSample};

/// Reads raw process and system state from the OS. Implementations copy values
/// verbatim and never derive rates.
pub trait SampleSource: Send {
    fn read_system_raw(&mut self) -> Result<RawSystemSample, SampleError>;
    fn list_live_pids(&self) -> Result<Vec<u32>, SampleError>;
    fn read_process_raw(&self, pid: u32) -> Result<RawProcessSample, SampleError>;

    /// Resolves a UID to a login name, if the platform knows it.
    fn user_name(&self, _uid: u32) -> Option<String> {
        None
    }
}

/// Signal delivery and scheduling-priority system calls.
pub trait ControlBackend: Send + Sync {
    fn signal(&self, pid: u32, kind: SignalKind) -> io::Result<()>;
    /// Checks the PID exists without delivering anything.
    fn probe(&self, pid: u32) -> io::Result<()>;
    /// An exited process that its parent has not reaped yet. It still passes `probe`.
    fn is_zombie(&self, _pid: u32) -> bool {
        false
    }
    fn nice(&self, pid: u32) -> io::Result<i32>;
    fn set_nice(&self, pid: u32, value: i32) -> io::Result<()>;
}

/// How a failed control call should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFailure {
    NoSuchProcess,
    PermissionDenied,
    Other,
}

pub fn classify_os_error(err: &io::Error) -> OsFailure {
    #[cfg(unix)]
    match err.raw_os_error() {
        Some(libc::ESRCH) => return OsFailure::NoSuchProcess,
        Some(libc::EPERM) | Some(libc::EACCES) => return OsFailure::PermissionDenied,
        _ => {}
    }
    match err.kind() {
        io::ErrorKind::NotFound => OsFailure::NoSuchProcess,
        io::ErrorKind::PermissionDenied => OsFailure::PermissionDenied,
        _ => OsFailure::Other,
    }
}

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(unix)]
pub mod unix;
#[cfg(not(target_os = "linux"))]
mod unsupported;

pub fn default_source(proc_root: &Path) -> Box<dyn SampleSource> {
    #[cfg(target_os = "linux")]
    {
        Box::new(linux::ProcfsSource::new(proc_root))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = proc_root;
        Box::new(unsupported::UnsupportedSource)
    }
}

pub fn default_backend() -> Box<dyn ControlBackend> {
    #[cfg(unix)]
    {
        Box::new(unix::LibcBackend)
    }
    #[cfg(not(unix))]
    {
        Box::new(unsupported::UnsupportedBackend)
    }
}
