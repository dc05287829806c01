use alloc_counter::no_alloc;
use std::ffi::c_int;
use std::os::fd::{FromRawFd, OwnedFd};

use crate::error::{bail_errno, Errno, Error, Result};

/// Which side of a `fork(2)` we are running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkResult {
    Child,
    Parent(libc::pid_t),
}

/// Fork the calling process.
///
/// # Safety
///
/// In a multithreaded program the child may only call async-signal-safe functions until it
/// execs or exits.
#[cfg_attr(debug_assertions, no_alloc)]
pub unsafe fn fork() -> Result<ForkResult> {
    match libc::fork() {
        -1 => bail_errno!(Error::Fork),
        0 => Ok(ForkResult::Child),
        pid => Ok(ForkResult::Parent(pid)),
    }
}

/// Create a close-on-exec Unix stream socket pair.
pub fn socket_pair() -> Result<(OwnedFd, OwnedFd)> {
    let mut socket_fds = [0; 2];
    let 0.. = (unsafe {
        libc::socketpair(
            libc::AF_UNIX,
            libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
            0,
            socket_fds.as_mut_ptr(),
        )
    }) else {
        bail_errno!(Error::SocketPair);
    };
    let [a, b] = socket_fds;
    Ok(unsafe { (OwnedFd::from_raw_fd(a), OwnedFd::from_raw_fd(b)) })
}

/// How a reaped child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The child called `exit(2)` with this code.
    Code(c_int),

    /// The child was killed by this signal.
    Signal { signal: c_int, core_dumped: bool },
}

impl ExitStatus {
    pub fn from_wait_status(wait_status: c_int) -> Result<ExitStatus> {
        if libc::WIFEXITED(wait_status) {
            return Ok(ExitStatus::Code(libc::WEXITSTATUS(wait_status)));
        }
        if libc::WIFSIGNALED(wait_status) {
            return Ok(ExitStatus::Signal {
                signal: libc::WTERMSIG(wait_status),
                core_dumped: libc::WCOREDUMP(wait_status),
            });
        }

        Err(Error::InvalidWaitStatus(wait_status))
    }

    /// Re-pack the status into the word `wait(2)` reported for it.
    pub fn into_raw(self) -> c_int {
        match self {
            ExitStatus::Code(code) => (code & 0xff) << 8,
            ExitStatus::Signal {
                signal,
                core_dumped,
            } => (signal & 0x7f) | if core_dumped { 0x80 } else { 0 },
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }
}

/// Block until the child `pid` terminates, and reap it.
///
/// Waits interrupted by a signal are re-issued for the same pid.
pub fn waitpid(pid: libc::pid_t) -> Result<ExitStatus> {
    let mut status: c_int = 0;
    loop {
        let 0.. = (unsafe { libc::waitpid(pid, &mut status as *mut c_int, 0) }) else {
            let errno = Errno::last();
            if errno.0 == libc::EINTR {
                continue;
            }
            return Err(Error::Wait(errno));
        };
        return ExitStatus::from_wait_status(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_exit_code() {
        let status = ExitStatus::from_wait_status(0x0700).unwrap();
        assert_eq!(status, ExitStatus::Code(7));
        assert!(!status.success());
        assert_eq!(status.into_raw(), 1792);
    }

    #[test]
    fn decodes_signal_with_core_dump() {
        let status = ExitStatus::from_wait_status(libc::SIGABRT | 0x80).unwrap();
        assert_eq!(
            status,
            ExitStatus::Signal {
                signal: libc::SIGABRT,
                core_dumped: true
            }
        );
        assert_eq!(status.into_raw(), libc::SIGABRT | 0x80);
    }

    #[test]
    fn rejects_stopped_status() {
        // WIFSTOPPED: low byte 0x7f, stop signal in the next byte.
        let stopped = (libc::SIGSTOP << 8) | 0x7f;
        assert!(matches!(
            ExitStatus::from_wait_status(stopped),
            Err(Error::InvalidWaitStatus(s)) if s == stopped
        ));
    }

    #[test]
    fn waitpid_on_non_child_fails() {
        // pid 1 is never our child.
        assert!(matches!(waitpid(1), Err(Error::Wait(Errno(libc::ECHILD)))));
    }
}
