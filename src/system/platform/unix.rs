use std::io;

use super::ControlBackend;
use crate::system::control::SignalKind;

/// Issues `kill(2)` and `getpriority(2)`/`setpriority(2)` directly.
pub struct LibcBackend;

fn signal_number(kind: SignalKind) -> libc::c_int {
    match kind {
        SignalKind::Terminate => libc::SIGTERM,
        SignalKind::Kill => libc::SIGKILL,
        SignalKind::Interrupt => libc::SIGINT,
        SignalKind::Hangup => libc::SIGHUP,
        SignalKind::Stop => libc::SIGSTOP,
        SignalKind::Continue => libc::SIGCONT,
    }
}

fn to_pid(pid: u32) -> io::Result<libc::pid_t> {
    // Zero and negative values address process groups; never send those.
    match libc::pid_t::try_from(pid) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(io::Error::from_raw_os_error(libc::ESRCH)),
    }
}

fn kill(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let pid = to_pid(pid)?;
    // SAFETY: kill takes plain integers and reports failure through errno.
    if unsafe { libc::kill(pid, signal) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn clear_errno() {
    // SAFETY: the errno location is thread-local and always valid to write.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    unsafe {
        *libc::__errno_location() = 0
    };
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    unsafe {
        *libc::__error() = 0
    };
}

impl ControlBackend for LibcBackend {
    fn signal(&self, pid: u32, kind: SignalKind) -> io::Result<()> {
        kill(pid, signal_number(kind))
    }

    fn probe(&self, pid: u32) -> io::Result<()> {
        kill(pid, 0)
    }

    #[cfg(target_os = "linux")]
    fn is_zombie(&self, pid: u32) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .ok()
            .and_then(|stat| super::linux::parse_pid_stat(&stat))
            .is_some_and(|stat| stat.state == 'Z')
    }

    fn nice(&self, pid: u32) -> io::Result<i32> {
        let pid = to_pid(pid)?;
        // getpriority can legitimately return -1, so errno tells the two apart.
        clear_errno();
        // SAFETY: getpriority takes plain integers and reports failure through errno.
        let value = unsafe { libc::getpriority(libc::PRIO_PROCESS, pid as libc::id_t) };
        if value == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error().is_some_and(|code| code != 0) {
                return Err(err);
            }
        }
        Ok(value)
    }

    fn set_nice(&self, pid: u32, value: i32) -> io::Result<()> {
        let pid = to_pid(pid)?;
        // SAFETY: setpriority takes plain integers and reports failure through errno.
        if unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, value) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_zero_is_never_signalled() {
        let err = LibcBackend.probe(0).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ESRCH));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn running_process_is_not_a_zombie() {
        assert!(!LibcBackend.is_zombie(std::process::id()));
        assert!(!LibcBackend.is_zombie(u32::MAX));
    }

    #[test]
    fn reads_own_nice_value() {
        let nice = LibcBackend.nice(std::process::id()).unwrap();
        assert!((-20..=19).contains(&nice));
    }
}
