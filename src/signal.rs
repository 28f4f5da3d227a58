//! Signal plumbing: delivery to children and the wakeup channel the parent
//! blocks on.
//!
//! SIGCHLD is read from a `signalfd` while it is blocked on the supervising
//! thread. No handler is installed, so neither the parent's dispositions nor
//! any handler-registry state leaks into the children.

use crate::errors::{SupervisorError, SupervisorResult};
use crate::timeout::SignalSender;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{self, SigSet, SigmaskHow, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use nix::unistd::Pid;
use std::os::fd::AsFd;
use std::time::Duration;
use tracing::{debug, trace};

/// Longest the parent sleeps without re-checking its children.
///
/// SIGCHLD is only blocked on the supervising thread; when the kernel hands
/// it to another thread it never reaches the signalfd.
pub const RECHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Why the parent's wait returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// A child may have changed state
    ChildStateChanged,
    /// The earliest timeout deadline was reached
    AlarmFired,
}

/// SIGCHLD as a readable file descriptor, plus the alarm deadline as the
/// poll timeout.
///
/// Dropping it restores the thread's signal mask as it was before
/// [`Wakeups::register`].
pub struct Wakeups {
    fd: SignalFd,
    previous_mask: SigSet,
}

impl Wakeups {
    /// Must be registered before the first fork, otherwise an early child
    /// exit could be missed.
    pub fn register() -> nix::Result<Self> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGCHLD);

        let previous_mask = mask.thread_swap_mask(SigmaskHow::SIG_BLOCK)?;
        match SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC) {
            Ok(fd) => Ok(Self { fd, previous_mask }),
            Err(e) => {
                let _ = previous_mask.thread_set_mask();
                Err(e)
            }
        }
    }

    /// The mask children must go back to after the fork
    pub fn previous_mask(&self) -> SigSet {
        self.previous_mask
    }

    /// Block until SIGCHLD arrives, the alarm deadline `alarm_in` passes, or
    /// [`RECHECK_INTERVAL`] elapses.
    pub fn wait(&mut self, alarm_in: Option<Duration>) -> SupervisorResult<Wakeup> {
        let (timeout, alarm_bound) = match alarm_in {
            Some(after) if after <= RECHECK_INTERVAL => (after, true),
            _ => (RECHECK_INTERVAL, false),
        };

        let ready = {
            let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, poll_timeout(timeout)) {
                Ok(n) => n > 0,
                Err(Errno::EINTR) => return Ok(Wakeup::ChildStateChanged),
                Err(e) => return Err(SupervisorError::Nix(e)),
            }
        };

        if ready {
            self.drain()?;
            return Ok(Wakeup::ChildStateChanged);
        }
        if alarm_bound {
            return Ok(Wakeup::AlarmFired);
        }
        trace!("periodic child re-check");
        Ok(Wakeup::ChildStateChanged)
    }

    /// Consume every queued SIGCHLD; one reap pass handles them all.
    fn drain(&mut self) -> nix::Result<()> {
        let mut count = 0usize;
        while self.fd.read_signal()?.is_some() {
            count += 1;
        }
        trace!(count, "drained SIGCHLD");
        Ok(())
    }
}

impl Drop for Wakeups {
    fn drop(&mut self) {
        if let Err(e) = self.previous_mask.thread_set_mask() {
            debug!(error = %e, "failed to restore signal mask");
        }
    }
}

/// Milliseconds for `poll(2)`, rounded up so a sub-millisecond deadline
/// does not busy-loop.
fn poll_timeout(after: Duration) -> PollTimeout {
    let millis = (after.as_nanos() + 999_999) / 1_000_000;
    PollTimeout::from(u16::try_from(millis).unwrap_or(u16::MAX))
}

/// Send a signal to a process.
///
/// Returns `Ok(false)` when the process no longer exists.
pub fn send_signal(pid: Pid, sig: Signal) -> SupervisorResult<bool> {
    match signal::kill(pid, sig) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => {
            debug!(%pid, signal = %sig, "process already gone");
            Ok(false)
        }
        Err(e) => Err(SupervisorError::Signal(format!(
            "failed to send {} to {}: {}",
            sig, pid, e
        ))),
    }
}

/// [`SignalSender`] backed by `kill(2)`
#[derive(Debug, Default, Clone, Copy)]
pub struct KillSender;

impl SignalSender for KillSender {
    fn send(&mut self, pid: Pid, sig: Signal) -> SupervisorResult<bool> {
        send_signal(pid, sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Instant;

    #[test]
    fn test_poll_timeout_rounds_up() {
        assert_eq!(poll_timeout(Duration::ZERO), PollTimeout::ZERO);
        assert_eq!(poll_timeout(Duration::from_micros(10)), PollTimeout::from(1u16));
        assert_eq!(poll_timeout(Duration::from_millis(50)), PollTimeout::from(50u16));
        assert_eq!(poll_timeout(Duration::from_secs(3600)), PollTimeout::from(u16::MAX));
    }

    #[test]
    #[serial]
    fn test_wakeups_restore_thread_mask() {
        let before = SigSet::thread_get_mask().unwrap();
        assert!(!before.contains(Signal::SIGCHLD));

        let wakeups = Wakeups::register().unwrap();
        assert!(SigSet::thread_get_mask().unwrap().contains(Signal::SIGCHLD));
        assert!(!wakeups.previous_mask().contains(Signal::SIGCHLD));

        drop(wakeups);
        assert!(!SigSet::thread_get_mask().unwrap().contains(Signal::SIGCHLD));
    }

    #[test]
    #[serial]
    fn test_wait_reports_alarm_at_deadline() {
        let mut wakeups = Wakeups::register().unwrap();

        let started = Instant::now();
        let wakeup = wakeups.wait(Some(Duration::from_millis(20))).unwrap();
        assert_eq!(wakeup, Wakeup::AlarmFired);
        assert!(started.elapsed() >= Duration::from_millis(20));

        // a far deadline only bounds the sleep by the re-check interval
        let wakeup = wakeups.wait(Some(Duration::from_secs(60))).unwrap();
        assert_eq!(wakeup, Wakeup::ChildStateChanged);
    }

    #[test]
    #[serial]
    fn test_wait_wakes_on_sigchld() {
        let mut wakeups = Wakeups::register().unwrap();
        signal::raise(Signal::SIGCHLD).unwrap();

        let wakeup = wakeups.wait(Some(Duration::from_millis(20))).unwrap();
        assert_eq!(wakeup, Wakeup::ChildStateChanged);
        // drained: the next wait runs into the deadline
        let wakeup = wakeups.wait(Some(Duration::from_millis(20))).unwrap();
        assert_eq!(wakeup, Wakeup::AlarmFired);
    }

    #[test]
    fn test_send_signal_to_missing_process() {
        // PIDs this large are above the default pid_max
        let result = send_signal(Pid::from_raw(99_999_999), Signal::SIGTERM);
        assert!(matches!(result, Ok(false)));
    }

    #[test]
    fn test_null_signal_to_self() {
        // Signal 0 only checks for existence
        assert!(signal::kill(Pid::this(), None).is_ok());
    }
}
