//! The supervisor: launch one child, wait for it, and report how it ended.

use std::fmt;

use tracing::{debug, span, warn, Level};

use crate::error::{Errno, Error, Result};
use crate::{Command, ExitStatus};

/// Path of the executable launched by [`default_target`], relative to the working directory.
pub const DEFAULT_PROGRAM: &str = "./hello.binary";

/// `argv[0]` passed to [`DEFAULT_PROGRAM`].
pub const DEFAULT_ARGV0: &str = "hello.binary";

/// The identifier reported when process creation fails.
pub const FORK_FAILED_PID: i32 = -1;

/// Exit code of the supervisor when process creation fails.
pub const FORK_FAILED_EXIT_CODE: i32 = -1;

/// The fixed target: `./hello.binary`, with `argv = ["hello.binary"]`.
pub fn default_target() -> Command {
    let mut cmd = Command::new(DEFAULT_PROGRAM);
    cmd.argv0(DEFAULT_ARGV0);
    cmd
}

/// A reaped child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub pid: u32,
    pub status: ExitStatus,
}

/// How a supervision ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The child was launched, and has been waited on and reaped.
    Reaped(Report),

    /// Process creation failed, so there was nothing to wait for.
    ForkFailed(Errno),
}

impl Outcome {
    /// Exit code for the supervisor itself. Any reaped child counts as success, whatever its
    /// own status was.
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Reaped(_) => 0,
            Outcome::ForkFailed(_) => FORK_FAILED_EXIT_CODE,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "child pid was {}, it exited with {}",
            self.pid,
            self.status.into_raw()
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::Reaped(report) => fmt::Display::fmt(report, f),
            Outcome::ForkFailed(_) => write!(f, "fork failed with error code {FORK_FAILED_PID}"),
        }
    }
}

/// Launch `command` once, and block until that child has terminated.
///
/// Fork failure is an [`Outcome`], not an error: it is part of the supervisor's contract.
/// Errors are reserved for everything else (bad configuration, a failing `waitpid(2)`).
pub fn supervise(command: Command) -> Result<Outcome> {
    let span = span!(Level::DEBUG, "supervise", program = ?command.get_program());
    let _span_guard = span.enter();

    let child = match command.spawn() {
        Ok(child) => child,
        Err(Error::Fork(errno)) => {
            warn!(%errno, "failed to create child process");
            return Ok(Outcome::ForkFailed(errno));
        }
        Err(e) => return Err(e),
    };

    let pid = child.id();
    debug!(pid, "waiting for child");

    let status = child.wait()?;
    debug!(pid, %status, "child exited");

    Ok(Outcome::Reaped(Report { pid, status }))
}
