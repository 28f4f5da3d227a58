//! Parent-side wait loop: reaps children, classifies how they ended and
//! keeps the timeout alarm up to date until every spawned unit is
//! accounted for.

use crate::errors::{SupervisorError, SupervisorResult};
use crate::outcome::ExitOutcome;
use crate::signal::{Wakeup, Wakeups};
use crate::timeout::{Alarm, SignalSender, TimeoutTable};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Non-blocking status query for one child
pub trait ChildWaiter {
    fn try_wait(&mut self, pid: Pid) -> nix::Result<WaitStatus>;
}

/// [`ChildWaiter`] backed by `waitpid(pid, WNOHANG)`.
///
/// Only pids the supervisor spawned are ever waited on, so children owned
/// by other parts of the program are left alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NixWaiter;

impl ChildWaiter for NixWaiter {
    fn try_wait(&mut self, pid: Pid) -> nix::Result<WaitStatus> {
        waitpid(pid, Some(WaitPidFlag::WNOHANG))
    }
}

/// Blocks until something worth re-checking happened. `alarm_in` is the
/// time left on the timeout alarm, if it is armed.
pub trait WakeSource {
    fn wait(&mut self, alarm_in: Option<Duration>) -> SupervisorResult<Wakeup>;
}

impl WakeSource for Wakeups {
    fn wait(&mut self, alarm_in: Option<Duration>) -> SupervisorResult<Wakeup> {
        Wakeups::wait(self, alarm_in)
    }
}

/// A child that reached a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reaped {
    pub pid: Pid,
    pub index: usize,
    pub outcome: ExitOutcome,
}

/// Pending children and the outcomes collected so far
#[derive(Debug, Default)]
pub struct Reaper {
    pending: HashMap<Pid, usize>,
    outcomes: BTreeMap<usize, ExitOutcome>,
    kill_on_drop: bool,
}

impl Reaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reaper for real children: if it is dropped while children are
    /// still pending (a hook panicked, a wait failed) they are killed and
    /// reaped instead of being left behind.
    pub fn supervising() -> Self {
        Self {
            pending: HashMap::new(),
            outcomes: BTreeMap::new(),
            kill_on_drop: true,
        }
    }

    pub fn track(&mut self, pid: Pid, index: usize) {
        self.pending.insert(pid, index);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn index_of(&self, pid: Pid) -> Option<usize> {
        self.pending.get(&pid).copied()
    }

    /// Apply one wait status. Terminal statuses of tracked children are
    /// recorded and the child stops being pending; anything else is
    /// ignored.
    pub fn record(&mut self, status: WaitStatus) -> Option<Reaped> {
        let pid = status.pid()?;
        let index = self.index_of(pid)?;
        let outcome = ExitOutcome::from_wait_status(status)?;

        self.pending.remove(&pid);
        self.outcomes.insert(index, outcome);
        debug!(%pid, index, code = outcome.code(), "reaped child");
        Some(Reaped {
            pid,
            index,
            outcome,
        })
    }

    /// Check every pending child once without blocking
    pub fn poll(&mut self, waiter: &mut dyn ChildWaiter) -> SupervisorResult<Vec<Reaped>> {
        let mut pids: Vec<(usize, Pid)> = self.pending.iter().map(|(&pid, &i)| (i, pid)).collect();
        pids.sort_unstable_by_key(|&(index, _)| index);

        let mut reaped = Vec::new();
        for (_, pid) in pids {
            let status = loop {
                match waiter.try_wait(pid) {
                    Err(Errno::EINTR) => continue,
                    other => break other,
                }
            };
            match status {
                Ok(status) => reaped.extend(self.record(status)),
                Err(Errno::ECHILD) => {
                    // someone else reaped it; there is no status left to report
                    warn!(%pid, "child vanished before it could be reaped");
                    self.pending.remove(&pid);
                }
                Err(source) => {
                    error!(%pid, %source, "waitpid failed");
                    return Err(SupervisorError::Wait { pid, source });
                }
            }
        }
        Ok(reaped)
    }

    /// Index-keyed outcomes of every child reaped so far
    pub fn take_outcomes(&mut self) -> BTreeMap<usize, ExitOutcome> {
        std::mem::take(&mut self.outcomes)
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        if !self.kill_on_drop || self.pending.is_empty() {
            return;
        }
        warn!(pending = self.pending.len(), "killing unreaped children");
        for (&pid, _) in self.pending.iter() {
            let _ = kill(pid, Signal::SIGKILL);
            let _ = waitpid(pid, None);
        }
        self.pending.clear();
    }
}

/// Everything the wait loop touches besides the reaper itself
pub struct WaitLoop<'a> {
    pub wakeups: &'a mut dyn WakeSource,
    pub waiter: &'a mut dyn ChildWaiter,
    pub timeouts: &'a mut TimeoutTable,
    pub sender: &'a mut dyn SignalSender,
    pub alarm: &'a mut dyn Alarm,
}

impl WaitLoop<'_> {
    /// Run until no child is pending, calling `on_reaped` for each child
    /// as it is reaped. The alarm is disarmed on return.
    pub fn run<F>(&mut self, reaper: &mut Reaper, mut on_reaped: F) -> SupervisorResult<()>
    where
        F: FnMut(&Reaped),
    {
        // catches zero/negative timeouts and arms the first alarm
        self.timeouts
            .recompute_and_arm(Instant::now(), &mut *self.sender, &mut *self.alarm)?;

        loop {
            for reaped in reaper.poll(&mut *self.waiter)? {
                self.timeouts.forget(reaped.pid);
                on_reaped(&reaped);
            }
            if reaper.is_done() {
                break;
            }

            let wakeup = self.wakeups.wait(self.alarm.remaining(Instant::now()))?;
            let now = Instant::now();
            if wakeup == Wakeup::AlarmFired || self.alarm.remaining(now) == Some(Duration::ZERO) {
                self.timeouts
                    .recompute_and_arm(now, &mut *self.sender, &mut *self.alarm)?;
            }
        }

        self.alarm.disarm()
    }
}
