//! OS process liveness checks and signals.
//!
//! Liveness uses POSIX signal 0: `kill(pid, 0)` succeeds for a live process,
//! fails with `EPERM` for a live process we may not signal, and fails with
//! `ESRCH` once the pid is gone. On Linux a zombie (exited, not yet reaped)
//! also counts as dead.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;
use tokio::time::Instant;
use tracing::debug;

use crate::error::TrackerError;

/// Poll interval used while waiting for a signalled process to disappear.
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result of delivering a signal to a tracked pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDelivery {
    Delivered,
    /// The pid no longer existed when the signal was sent.
    AlreadyDead,
}

/// Check whether `pid` refers to a live process.
pub fn is_pid_alive(pid: u32) -> bool {
    let Some(raw) = to_raw(pid) else {
        return false;
    };

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => !is_zombie(pid),
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Send `signal` to the process group led by `pid`, falling back to the pid
/// alone when no such group exists (e.g. a process adopted from a record
/// written by another host).
pub fn send_signal(pid: u32, signal: Signal) -> Result<SignalDelivery, TrackerError> {
    let Some(raw) = to_raw(pid) else {
        return Ok(SignalDelivery::AlreadyDead);
    };
    let target = Pid::from_raw(raw);

    match killpg(target, signal) {
        Ok(()) => return Ok(SignalDelivery::Delivered),
        Err(Errno::ESRCH) => {}
        Err(errno) => return Err(TrackerError::Signal { pid, errno }),
    }

    match kill(target, signal) {
        Ok(()) => Ok(SignalDelivery::Delivered),
        Err(Errno::ESRCH) => {
            debug!(pid, ?signal, "Signal target already gone");
            Ok(SignalDelivery::AlreadyDead)
        }
        Err(errno) => Err(TrackerError::Signal { pid, errno }),
    }
}

/// Poll until `pid` is no longer alive or `timeout` elapses.
///
/// Returns `true` if the process disappeared within the window.
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_pid_alive(pid) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return !is_pid_alive(pid);
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL.min(deadline - now)).await;
    }
}

fn to_raw(pid: u32) -> Option<i32> {
    // 0 and negative values address process groups, never a single process.
    i32::try_from(pid).ok().filter(|raw| *raw > 0)
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // Format: "<pid> (<comm>) <state> ...", where comm may itself contain ')'.
    stat.rfind(')')
        .and_then(|idx| stat[idx + 1..].split_whitespace().next())
        .is_some_and(|state| state == "Z")
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Far above any kernel's pid_max, so guaranteed not to exist.
    const DEAD_PID: u32 = 2_000_000_000;

    #[test]
    fn current_process_is_alive() {
        assert!(is_pid_alive(std::process::id()));
    }

    #[test]
    fn nonexistent_pid_is_dead() {
        assert!(!is_pid_alive(DEAD_PID));
    }

    #[test]
    fn group_addressing_pids_are_never_alive() {
        assert!(!is_pid_alive(0));
        assert!(!is_pid_alive(u32::MAX));
    }

    #[test]
    fn signalling_missing_pid_reports_already_dead() {
        let delivery = send_signal(DEAD_PID, Signal::SIGTERM).unwrap();
        assert_eq!(delivery, SignalDelivery::AlreadyDead);
    }

    #[tokio::test]
    async fn wait_for_exit_returns_immediately_for_dead_pid() {
        let start = std::time::Instant::now();
        assert!(wait_for_exit(DEAD_PID, Duration::from_secs(5)).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn wait_for_exit_times_out_for_live_pid() {
        assert!(!wait_for_exit(std::process::id(), Duration::from_millis(120)).await);
    }
}
