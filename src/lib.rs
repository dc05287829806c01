//! Launch a single child process, replace its image with a fixed program, and reap it.
//!
//! ```no_run
//! let outcome = watchdog::supervise(watchdog::default_target())?;
//! println!("{outcome}");
//! std::process::exit(outcome.exit_code());
//! # Ok::<(), watchdog::Error>(())
//! ```

mod libc_util;

mod error;
pub mod spawn;

mod command;
mod supervisor;

pub use error::{Errno, Error, Result};

pub use command::{Child, Command, ExitStatus};
pub use supervisor::{
    default_target, supervise, Outcome, Report, DEFAULT_ARGV0, DEFAULT_PROGRAM,
    FORK_FAILED_EXIT_CODE, FORK_FAILED_PID,
};

/// In test builds, use alloc_counter to verify at runtime that the functions which must be
/// async-signal-safe do not allocate.
#[cfg(debug_assertions)]
#[global_allocator]
static ALLOC: alloc_counter::AllocCounterSystem = alloc_counter::AllocCounterSystem;
