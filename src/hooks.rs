//! Lifecycle hooks of a supervisor
//!
//! Every hook is optional and defaults to doing nothing, except the fork
//! failure hook whose default aborts the run.

use crate::launcher::ChildSetup;
use crate::outcome::{ExitOutcome, UnitKey};
use crate::title::{ProcessTitle, SystemProcessTitle};
use nix::sys::signal::Signal;

/// What to do when the OS cannot create a process for a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForkFailurePolicy {
    /// Stop spawning, drain the units already running, then return
    /// [`crate::SupervisorError::ForkFailed`].
    #[default]
    Abort,
    /// Skip the unit and keep spawning the rest
    Continue,
}

type ForkFailedHook<D> = Box<dyn Fn(usize, &D) -> ForkFailurePolicy>;
type ChildExitedHook<D> = Box<dyn Fn(&ExitOutcome, &D)>;
type ExitStatusHook<D> = Box<dyn Fn(i32, &D)>;
type ExitSignalHook<D> = Box<dyn Fn(Signal, &D)>;

/// Hooks handed to [`crate::Supervisor::with_hooks`]
pub struct Hooks<D> {
    on_fork_failed: Option<ForkFailedHook<D>>,
    on_child_exited: Option<ChildExitedHook<D>>,
    on_exit_status: Option<ExitStatusHook<D>>,
    on_exit_signal: Option<ExitSignalHook<D>>,
    pub(crate) child: ChildSetup,
}

impl<D> Default for Hooks<D> {
    fn default() -> Self {
        Self {
            on_fork_failed: None,
            on_child_exited: None,
            on_exit_status: None,
            on_exit_signal: None,
            child: ChildSetup {
                title: Box::new(SystemProcessTitle),
                title_hook: None,
                init: None,
                signal_mask: None,
            },
        }
    }
}

impl<D> Hooks<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called in the parent with the index and data of a unit that could
    /// not be forked
    pub fn on_fork_failed<F>(mut self, hook: F) -> Self
    where
        F: Fn(usize, &D) -> ForkFailurePolicy + 'static,
    {
        self.on_fork_failed = Some(Box::new(hook));
        self
    }

    /// Called inside every child, after its title is set and before the
    /// unit callback runs
    pub fn on_child_init<F>(mut self, hook: F) -> Self
    where
        F: Fn() + 'static,
    {
        self.child.init = Some(Box::new(hook));
        self
    }

    /// Called in the parent for every reaped child
    pub fn on_child_exited<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ExitOutcome, &D) + 'static,
    {
        self.on_child_exited = Some(Box::new(hook));
        self
    }

    /// Called in the parent for every child that exited on its own
    pub fn on_exit_status<F>(mut self, hook: F) -> Self
    where
        F: Fn(i32, &D) + 'static,
    {
        self.on_exit_status = Some(Box::new(hook));
        self
    }

    /// Called in the parent for every child killed by a signal
    pub fn on_exit_signal<F>(mut self, hook: F) -> Self
    where
        F: Fn(Signal, &D) + 'static,
    {
        self.on_exit_signal = Some(Box::new(hook));
        self
    }

    /// Compute a child's title from the existing title and the unit label.
    /// Units with an explicit `process_title` option skip the hook.
    pub fn process_title<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &UnitKey) -> Option<String> + 'static,
    {
        self.child.title_hook = Some(Box::new(hook));
        self
    }

    /// Replace how titles are read and written in the child
    pub fn title_capability<T>(mut self, title: T) -> Self
    where
        T: ProcessTitle + 'static,
    {
        self.child.title = Box::new(title);
        self
    }

    pub(crate) fn fork_failed(&self, index: usize, data: &D) -> ForkFailurePolicy {
        self.on_fork_failed
            .as_ref()
            .map_or(ForkFailurePolicy::default(), |hook| hook(index, data))
    }

    pub(crate) fn child_exited(&self, outcome: &ExitOutcome, data: &D) {
        if let Some(hook) = &self.on_child_exited {
            hook(outcome, data);
        }
        match *outcome {
            ExitOutcome::Exited(code) => {
                if let Some(hook) = &self.on_exit_status {
                    hook(code, data);
                }
            }
            ExitOutcome::Signaled(signal) => {
                if let Some(hook) = &self.on_exit_signal {
                    hook(signal, data);
                }
            }
        }
    }
}
