//! Process signalling by pid.
//!
//! Used for processes the daemon has no `Child` handle for: kernels left
//! behind by a previous daemon, and liveness checks of persisted pids.

/// Whether a process with this pid currently exists.
#[cfg(unix)]
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

/// Whether a process with this pid currently exists.
#[cfg(not(unix))]
#[must_use]
pub fn pid_alive(_pid: u32) -> bool {
    false
}

/// Ask a process to terminate. Returns `true` if the signal was delivered.
#[cfg(unix)]
pub fn terminate(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(pid, %err, "SIGTERM not delivered");
            false
        }
    }
}

/// Ask a process to terminate. Returns `true` if the signal was delivered.
#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> bool {
    false
}
