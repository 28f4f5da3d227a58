//! Per-child deadlines coalesced into a single pending alarm
//!
//! Every configured timeout becomes one [`TimeoutEntry`]. A scan delivers
//! whatever is overdue and arms the alarm for the earliest deadline that
//! is still in the future, so no monitor thread is needed and at most one
//! deadline is pending at any instant.

use crate::errors::SupervisorResult;
use crate::options::Escalation;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Delivers a signal to a process. `Ok(false)` means the target was
/// already gone.
pub trait SignalSender {
    fn send(&mut self, pid: Pid, sig: Signal) -> SupervisorResult<bool>;
}

/// A one-shot timer that wakes the wait loop. Arming replaces any
/// previously armed deadline.
pub trait Alarm {
    fn arm(&mut self, after: Duration) -> SupervisorResult<()>;
    fn disarm(&mut self) -> SupervisorResult<()>;
    /// Time left until the armed deadline, zero once it has passed
    fn remaining(&self, now: Instant) -> Option<Duration>;
}

/// The single pending deadline, kept in the parent instead of an OS timer.
/// The wait loop uses it as its sleep bound.
#[derive(Debug, Default)]
pub struct DeadlineAlarm {
    deadline: Option<Instant>,
}

impl DeadlineAlarm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }
}

impl Alarm for DeadlineAlarm {
    fn arm(&mut self, after: Duration) -> SupervisorResult<()> {
        self.deadline = Some(Instant::now() + after);
        Ok(())
    }

    fn disarm(&mut self) -> SupervisorResult<()> {
        self.deadline = None;
        Ok(())
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }
}

/// One deadline for one child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutEntry {
    pub pid: Pid,
    pub signal: Signal,
    pub deadline: Instant,
    /// Set once the signal was delivered; a fired entry never fires again
    /// and no longer counts towards the next deadline.
    pub fired: bool,
}

/// A signal delivered by [`TimeoutTable::fire_due`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    pub pid: Pid,
    pub signal: Signal,
}

#[derive(Debug, Default)]
pub struct TimeoutTable {
    entries: Vec<TimeoutEntry>,
}

impl TimeoutTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the deadlines of a freshly spawned child
    pub fn arm_for(&mut self, pid: Pid, escalations: &[Escalation], now: Instant) {
        for escalation in escalations {
            self.entries.push(TimeoutEntry {
                pid,
                signal: escalation.signal,
                deadline: now + escalation.after,
                fired: false,
            });
        }
    }

    /// Drop every entry of a reaped child so its pid, once recycled, is
    /// never signalled.
    pub fn forget(&mut self, pid: Pid) {
        self.entries.retain(|entry| entry.pid != pid);
    }

    pub fn entries(&self) -> &[TimeoutEntry] {
        &self.entries
    }

    /// Number of entries still waiting to fire
    pub fn unfired(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.fired).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest deadline among the unfired entries
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .iter()
            .filter(|entry| !entry.fired)
            .map(|entry| entry.deadline)
            .min()
    }

    /// Deliver every unfired entry whose deadline is at or before `now`,
    /// earliest deadline first.
    pub fn fire_due(
        &mut self,
        now: Instant,
        sender: &mut dyn SignalSender,
    ) -> SupervisorResult<Vec<Fired>> {
        let mut due: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.fired && entry.deadline <= now)
            .map(|(i, _)| i)
            .collect();
        // stable: equal deadlines keep registration order
        due.sort_by_key(|&i| self.entries[i].deadline);

        let mut fired = Vec::with_capacity(due.len());
        for i in due {
            let entry = &mut self.entries[i];
            warn!(pid = %entry.pid, signal = %entry.signal, "timeout elapsed, signalling child");
            sender.send(entry.pid, entry.signal)?;
            entry.fired = true;
            fired.push(Fired {
                pid: entry.pid,
                signal: entry.signal,
            });
        }
        Ok(fired)
    }

    /// Fire what is overdue, then arm `alarm` for the next deadline or
    /// disarm it when nothing is left. Returns the delay the alarm was
    /// armed with.
    pub fn recompute_and_arm(
        &mut self,
        now: Instant,
        sender: &mut dyn SignalSender,
        alarm: &mut dyn Alarm,
    ) -> SupervisorResult<Option<Duration>> {
        self.fire_due(now, sender)?;

        match self.next_deadline() {
            Some(deadline) => {
                let after = deadline.saturating_duration_since(now);
                debug!(?after, pending = self.unfired(), "arming timeout alarm");
                alarm.arm(after)?;
                Ok(Some(after))
            }
            None => {
                alarm.disarm()?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Records deliveries instead of sending them
    #[derive(Debug, Default)]
    pub struct RecordingSender {
        pub sent: Vec<(Pid, Signal)>,
    }

    impl SignalSender for RecordingSender {
        fn send(&mut self, pid: Pid, sig: Signal) -> SupervisorResult<bool> {
            self.sent.push((pid, sig));
            Ok(true)
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeAlarm {
        pub armed: Option<Duration>,
        pub arms: usize,
    }

    impl Alarm for FakeAlarm {
        fn arm(&mut self, after: Duration) -> SupervisorResult<()> {
            self.armed = Some(after);
            self.arms += 1;
            Ok(())
        }

        fn disarm(&mut self) -> SupervisorResult<()> {
            self.armed = None;
            Ok(())
        }

        fn remaining(&self, _now: Instant) -> Option<Duration> {
            self.armed
        }
    }
}
