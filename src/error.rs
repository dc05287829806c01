use alloc_counter::no_alloc;
use std::ffi::c_int;

/// Result type for our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// An OS error number, captured from `errno` right after a failed call.
///
/// Formatting an `Errno` does not allocate, so it can be logged from a forked child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(pub c_int);

impl Errno {
    /// Capture the calling thread's current `errno`.
    #[cfg_attr(debug_assertions, no_alloc)]
    pub fn last() -> Errno {
        Errno(unsafe { *libc::__errno_location() })
    }
}

impl std::fmt::Display for Errno {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        // Get the error message from errno.
        let msg = unsafe { libc::strerror(self.0) };
        let msg_len = unsafe { libc::strlen(msg) };
        let msg_str: &str = unsafe {
            std::str::from_utf8_unchecked(std::slice::from_raw_parts(msg as *const u8, msg_len))
        };

        write!(f, "{} (errno {})", msg_str, self.0)
    }
}

/// Everything that can go wrong while launching and reaping a child.
///
/// The variants which carry an [`Errno`] are built on the post-fork path of the child, and
/// must stay allocation-free to construct and to format.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("fork(2) failed: {0}")]
    Fork(Errno),

    #[error("execv(2) failed: {0}")]
    Exec(Errno),

    #[error("waitpid(2) failed: {0}")]
    Wait(Errno),

    #[error("socketpair(2) failed: {0}")]
    SocketPair(Errno),

    #[error("invalid wait status {0:#x}")]
    InvalidWaitStatus(c_int),

    #[error("{0} contains an interior NUL byte")]
    InteriorNul(&'static str),
}

// Define a macro, bail_errno!, which returns the last OS error wrapped in an `Error` variant:
//
// - `bail_errno!(Error::Fork)` returns `Err(Error::Fork(Errno::last()))`.
macro_rules! bail_errno {
    ($variant:path) => {
        return Err($variant($crate::error::Errno::last()))
    };
}
pub(crate) use bail_errno;
