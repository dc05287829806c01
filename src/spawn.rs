use alloc_counter::no_alloc;
use std::ffi::{c_char, c_int, c_void, CStr};
use std::io::{BufRead, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::thread::JoinHandle;

use tracing::{debug, span, Level};

use crate::error::{Errno, Error, Result};
use crate::libc_util::*;

/// Exit code of a child which panicked before it could exec.
pub const PANIC_EXIT_CODE: c_int = 126;

/// Log a message (given in format_args! style) by writing it to a file descriptor.
///
/// This cannot allocate---buffer messages to a fixed-length, stack-allocated 2048-byte buffer.
///
/// ```ignore
/// log_fd!(fd, "msg {param}", param = 42)
/// ```
macro_rules! log_fd {
    ($fd:expr, $fmt:expr) => {
        {
            let mut buffer = [0u8; 2048];
            let mut cursor = std::io::Cursor::new(&mut buffer[..]);
            let _ = writeln!(cursor, $fmt);
            let _ = unsafe {libc::write($fd, cursor.get_ref().as_ptr() as *const c_void, cursor.position() as usize)};
        }
    };
    ($fd:expr, $fmt:expr, $($arg:tt)*) => {
        {
            let mut buffer = [0u8; 2048];
            let mut cursor = std::io::Cursor::new(&mut buffer[..]);
            let _ = writeln!(cursor, $fmt, $($arg)*);
            let _ = unsafe {libc::write($fd, cursor.get_ref().as_ptr() as *const c_void, cursor.position() as usize)};
        }
    };
}

/// Everything the child needs between `fork(2)` and `execv(2)`, allocated up-front.
#[derive(Debug)]
pub struct Context {
    /// Path of the executable which replaces the child's image.
    pub program: *const c_char,

    /// Null-element-terminated argument list.
    pub args: Vec<*const c_char>,

    /// Forward the child's diagnostic lines into the parent's `tracing` log.
    pub forward_spawn_logs: bool,
}

/// Handle to a forked child, which must be waited on exactly once.
#[derive(Debug)]
pub struct Child {
    pid: libc::pid_t,

    // Thread draining the child's log socket, if forwarding was enabled.
    log_forwarder: Option<JoinHandle<()>>,
}

/// Fork, and replace the child's image with `ctx.program`, returning a [`Child`] in the parent.
///
/// The child inherits the environment of the caller. If `execv(2)` fails, the child exits
/// immediately with the value `execv(2)` returned, without running any of the parent's cleanup.
///
/// # Safety
///
/// The pointers in `ctx` must be valid until this function returns.
pub unsafe fn spawn(ctx: Context) -> Result<Child> {
    let span = span!(Level::DEBUG, "spawn");
    let _span_guard = span.enter();

    // Create the child's log stream. Both ends are close-on-exec, so the forwarder sees EOF as
    // soon as the child execs or exits.
    let log_channel = if ctx.forward_spawn_logs {
        let (log_tx_fd, log_rx_fd) = socket_pair()?;
        let forwarder = spawn_log_forwarder(span!(Level::DEBUG, "child"), log_rx_fd);
        Some((log_tx_fd, forwarder))
    } else {
        None
    };
    let log_tx_raw_fd = log_channel.as_ref().map(|(tx, _)| tx.as_raw_fd());

    let pid = match fork()? {
        ForkResult::Child => {
            let code = child_extern(&ctx, log_tx_raw_fd);
            libc::_exit(code)
        }
        ForkResult::Parent(pid) => pid,
    };

    // Close our copy of the send end of the log stream.
    let log_forwarder = log_channel.map(|(log_tx_fd, forwarder)| {
        drop(log_tx_fd);
        forwarder
    });

    debug!(%pid, "forked child");

    Ok(Child { pid, log_forwarder })
}

impl Child {
    /// The process ID of the child.
    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    /// Wait for the child to exit, reaping it and returning the exit status.
    pub fn wait(self) -> Result<ExitStatus> {
        let status = waitpid(self.pid)?;
        debug!(pid = %self.pid, ?status, "reaped child");

        // The child is gone, so its end of the log stream is closed.
        if let Some(forwarder) = self.log_forwarder {
            let _ = forwarder.join();
        }

        Ok(status)
    }
}

/// Runs in the child: exec the target, and return the exit code to use if that fails.
fn child_extern(ctx: &Context, lfd: Option<c_int>) -> c_int {
    // Catch any panics, so they never unwind into the parent's copy of the stack.
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| unsafe {
        child_entrypoint(ctx, lfd)
    })) {
        Ok(code) => code,
        Err(_) => {
            if let Some(lfd) = lfd {
                log_fd!(lfd, "caught panic before exec");
            }
            PANIC_EXIT_CODE
        }
    }
}

#[cfg_attr(debug_assertions, no_alloc)]
unsafe fn child_entrypoint(ctx: &Context, lfd: Option<c_int>) -> c_int {
    if let Some(lfd) = lfd {
        let pid = libc::getpid();
        let program = CStr::from_ptr(ctx.program);
        log_fd!(lfd, "pid={pid} exec {program:?}");
    }

    // Replace the image. This only returns on failure.
    let ret = libc::execv(ctx.program, ctx.args.as_ptr());

    let err = Error::Exec(Errno::last());
    if let Some(lfd) = lfd {
        log_fd!(lfd, "error: {}", err);
    }

    ret
}

/// Start a thread to forward logs written to a socket to a particular span in the host's tracing
/// log.
fn spawn_log_forwarder(span: tracing::Span, log_rx_fd: OwnedFd) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let log_rx = std::os::unix::net::UnixStream::from(log_rx_fd);

        // Loop over lines
        for line in std::io::BufReader::new(log_rx).lines().flatten() {
            debug!(parent: &span, "{}", line);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use c_str_macro::c_str;
    use std::ptr;

    fn sh_context(script: &CStr, forward_spawn_logs: bool) -> Context {
        let sh = c_str!("/bin/sh");
        Context {
            program: sh.as_ptr(),
            args: vec![sh.as_ptr(), c_str!("-c").as_ptr(), script.as_ptr(), ptr::null()],
            forward_spawn_logs,
        }
    }

    #[test]
    fn false_exits_1() {
        let child = unsafe { spawn(sh_context(c_str!("exit 1"), false)) }.unwrap();
        assert!(child.pid() > 0);
        assert_eq!(child.wait().unwrap(), ExitStatus::Code(1));
    }

    #[test]
    fn child_sees_its_own_pid() {
        // The image is replaced in place, so the shell runs under the forked pid.
        let child = unsafe { spawn(sh_context(c_str!("exit $(($$ % 200))"), false)) }.unwrap();
        let expected = child.pid() % 200;
        assert_eq!(child.wait().unwrap(), ExitStatus::Code(expected));
    }

    #[test]
    fn killed_child_reports_signal() {
        let child = unsafe { spawn(sh_context(c_str!("kill -9 $$"), false)) }.unwrap();
        assert_eq!(
            child.wait().unwrap(),
            ExitStatus::Signal {
                signal: libc::SIGKILL,
                core_dumped: false
            }
        );
    }

    #[test]
    fn failed_exec_exits_with_exec_return_value() {
        let missing = c_str!("/nonexistent/hello.binary");
        let ctx = Context {
            program: missing.as_ptr(),
            args: vec![missing.as_ptr(), ptr::null()],
            forward_spawn_logs: false,
        };

        let child = unsafe { spawn(ctx) }.unwrap();

        // execv(2) returns -1, which the kernel truncates to 255.
        assert_eq!(child.wait().unwrap(), ExitStatus::Code(255));
    }

    #[test]
    fn forwarded_logs_do_not_block_reaping() {
        let missing = c_str!("/nonexistent/hello.binary");
        let ctx = Context {
            program: missing.as_ptr(),
            args: vec![missing.as_ptr(), ptr::null()],
            forward_spawn_logs: true,
        };

        let child = unsafe { spawn(ctx) }.unwrap();
        assert_eq!(child.wait().unwrap(), ExitStatus::Code(255));

        let child = unsafe { spawn(sh_context(c_str!("exit 3"), true)) }.unwrap();
        assert_eq!(child.wait().unwrap(), ExitStatus::Code(3));
    }
}
