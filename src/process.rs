//! OS process helpers.
//!
//! Liveness is probed with signal 0, which checks the process table without
//! delivering anything. Any error (no such process, permission denied, a pid
//! that does not fit) counts as "not alive".

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::debug;

/// Returns `true` if `pid` refers to a live process.
///
/// # Examples
///
/// ```
/// use oxide_courier::process::is_alive;
/// assert!(is_alive(std::process::id()));
/// ```
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    kill(Pid::from_raw(raw), None).is_ok()
}

/// Sends SIGTERM to `pid`.
///
/// A process that is already gone is not an error.
///
/// # Errors
///
/// Returns the errno for any other failure (e.g. permission denied).
pub fn terminate(pid: u32) -> Result<(), Errno> {
    let raw = i32::try_from(pid).map_err(|_| Errno::ESRCH)?;
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            debug!(pid, "Process already gone before SIGTERM");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
