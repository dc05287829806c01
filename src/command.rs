use std::ffi::{c_char, CString};
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};
use std::ptr;

use crate::error::{Error, Result};
use crate::{libc_util, spawn};

/// A program to be launched as a child process, with its argument vector.
///
/// The child always inherits the environment of the parent.
#[derive(Debug, Clone)]
pub struct Command {
    // Exec information
    program: PathBuf,
    args: Vec<String>,

    forward_spawn_logs: bool,
}

/// A handle to a launched child process.
#[derive(Debug)]
pub struct Child(spawn::Child);

/// The exit status of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus(libc_util::ExitStatus);

impl Command {
    /// Create a new command, with `argv[0]` set to `program`.
    pub fn new(program: impl AsRef<Path>) -> Command {
        let program = program.as_ref().to_owned();
        let argv0 = program.to_string_lossy().into_owned();
        Command {
            program,
            args: vec![argv0],
            forward_spawn_logs: false,
        }
    }

    /// Enable verbose logging to `tracing`, including lines written by the child before it
    /// execs.
    pub fn verbose(&mut self, enabled: bool) -> &mut Command {
        self.forward_spawn_logs = enabled;
        self
    }

    /// Set the contents of `argv[0]`.
    pub fn argv0(&mut self, argv0: impl AsRef<str>) -> &mut Command {
        self.args[0] = argv0.as_ref().to_owned();
        self
    }

    /// Append an argument.
    pub fn arg(&mut self, arg: impl AsRef<str>) -> &mut Command {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Append several arguments.
    pub fn args(&mut self, args: impl IntoIterator<Item = impl AsRef<str>>) -> &mut Command {
        self.args
            .extend(args.into_iter().map(|e| e.as_ref().to_owned()));
        self
    }

    /// Returns an iterator over the full argument vector, starting with `argv[0]`.
    pub fn get_args(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(|e| e.as_str())
    }

    /// Gets the executable path.
    pub fn get_program(&self) -> &Path {
        self.program.as_path()
    }

    /// Executes a command as a child process, waiting for it to finish and collecting
    /// its status.
    pub fn status(self) -> Result<ExitStatus> {
        let child = self.spawn()?;
        child.wait()
    }

    /// Spawn the subprocess, and return a handle to it.
    pub fn spawn(self) -> Result<Child> {
        // Null-terminate the program path.
        let program = CString::new(self.program.into_os_string().into_vec())
            .map_err(|_| Error::InteriorNul("program path"))?;

        // Collect the arguments.
        let args_buf = self
            .args
            .into_iter()
            .map(|e| CString::new(e).map_err(|_| Error::InteriorNul("argument")))
            .collect::<Result<Vec<_>>>()?;
        let mut args: Vec<*const c_char> = args_buf.iter().map(|a| a.as_ptr()).collect();
        args.push(ptr::null());

        let ctx = spawn::Context {
            program: program.as_ptr(),
            args,
            forward_spawn_logs: self.forward_spawn_logs,
        };

        // Spawn the child. `program` and `args_buf` outlive the call.
        let child = unsafe { spawn::spawn(ctx)? };

        Ok(Child(child))
    }
}

impl Child {
    /// Returns the OS-assigned process identifier of the child.
    pub fn id(&self) -> u32 {
        // fork(2) only hands positive pids to the parent.
        self.0.pid() as u32
    }

    /// Block until the child terminates, and reap it.
    pub fn wait(self) -> Result<ExitStatus> {
        Ok(ExitStatus(self.0.wait()?))
    }
}

impl ExitStatus {
    /// Was termination successful? Only an exit code of zero counts.
    pub fn success(&self) -> bool {
        self.0.success()
    }

    /// The exit code, if the child exited rather than being killed.
    pub fn code(&self) -> Option<i32> {
        match self.0 {
            libc_util::ExitStatus::Code(code) => Some(code),
            libc_util::ExitStatus::Signal { .. } => None,
        }
    }

    /// The signal which terminated the child, if any.
    pub fn signal(&self) -> Option<i32> {
        match self.0 {
            libc_util::ExitStatus::Code(_) => None,
            libc_util::ExitStatus::Signal { signal, .. } => Some(signal),
        }
    }

    pub fn core_dumped(&self) -> bool {
        matches!(
            self.0,
            libc_util::ExitStatus::Signal {
                core_dumped: true,
                ..
            }
        )
    }

    /// The packed status word, as `wait(2)` reported it.
    pub fn into_raw(self) -> i32 {
        self.0.into_raw()
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.0 {
            libc_util::ExitStatus::Code(code) => write!(f, "exit code: {code}"),
            libc_util::ExitStatus::Signal {
                signal,
                core_dumped: false,
            } => write!(f, "signal: {signal}"),
            libc_util::ExitStatus::Signal {
                signal,
                core_dumped: true,
            } => write!(f, "signal: {signal} (core dumped)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv0_defaults_to_program() {
        let mut cmd = Command::new("./hello.binary");
        assert_eq!(cmd.get_args().collect::<Vec<_>>(), ["./hello.binary"]);

        cmd.argv0("hello.binary").arg("-v");
        assert_eq!(cmd.get_program(), Path::new("./hello.binary"));
        assert_eq!(cmd.get_args().collect::<Vec<_>>(), ["hello.binary", "-v"]);
    }

    #[test]
    fn status_reports_exit_code() {
        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", "exit 7"]);

        let status = cmd.status().unwrap();
        assert_eq!(status.code(), Some(7));
        assert_eq!(status.signal(), None);
        assert!(!status.success());
        assert_eq!(status.into_raw(), 7 << 8);
        assert_eq!(status.to_string(), "exit code: 7");
    }

    #[test]
    fn argv0_is_passed_through() {
        let mut cmd = Command::new("/bin/sh");
        cmd.argv0("renamed-shell")
            .args(["-c", r#"test "$0" = renamed-shell"#]);
        assert!(cmd.status().unwrap().success());
    }

    #[test]
    fn interior_nul_is_rejected_before_forking() {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("bad\0arg");
        assert!(matches!(cmd.spawn(), Err(Error::InteriorNul("argument"))));
    }
}
