//! The supervisor facade
//!
//! A [`Supervisor`] collects units, forks one process per unit when
//! [`Supervisor::run`] is called, escalates timeouts and returns the outcome
//! of every unit once all of them have been reaped.
//!
//! # Example
//!
//! ```no_run
//! use fork_supervisor::{ForkOptions, Supervisor};
//! use std::time::Duration;
//!
//! let supervisor = Supervisor::<()>::new();
//! supervisor.add(|_| 0)?;
//! supervisor.register(
//!     |_| std::thread::sleep(Duration::from_secs(60)),
//!     ForkOptions::new().name("sleeper").timeout(Duration::from_secs(1)),
//!     (),
//! )?;
//!
//! let outcomes = supervisor.run()?;
//! assert_eq!(outcomes.code(0usize), Some(0));
//! assert_eq!(outcomes.code("sleeper"), Some(-15));
//! # Ok::<(), fork_supervisor::SupervisorError>(())
//! ```

use crate::errors::{SupervisorError, SupervisorResult};
use crate::hooks::{ForkFailurePolicy, Hooks};
use crate::launcher::{self, ChildSetup, LaunchFailed, Launched};
use crate::options::ForkOptions;
use crate::outcome::{map_outcomes, IntoExitCode, Outcomes, UnitKey};
use crate::reaper::{NixWaiter, Reaper, WaitLoop};
use crate::registry::{Registry, WorkUnit};
use crate::signal::{KillSender, Wakeups};
use crate::timeout::{DeadlineAlarm, TimeoutTable};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, info, warn};

struct Inner<D> {
    registry: Registry<D>,
    hooks: Hooks<D>,
}

/// Handle to one batch of forks.
///
/// Clones share the same registry. Once any handle starts the run, every
/// clone (including the copies living inside forked children) is frozen and
/// `register` fails with [`SupervisorError::AlreadyRunning`].
pub struct Supervisor<D = ()> {
    inner: Rc<RefCell<Inner<D>>>,
}

impl<D> Clone for Supervisor<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<D: 'static> Default for Supervisor<D> {
    fn default() -> Self {
        Self::with_hooks(Hooks::default())
    }
}

impl<D> fmt::Debug for Supervisor<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Supervisor")
            .field("units", &inner.registry.len())
            .field("running", &inner.registry.has_run())
            .finish()
    }
}

impl<D: 'static> Supervisor<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hooks(hooks: Hooks<D>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                registry: Registry::new(),
                hooks,
            })),
        }
    }

    /// Register a unit and return its index
    pub fn register<F, R>(&self, callback: F, options: ForkOptions, data: D) -> SupervisorResult<usize>
    where
        F: FnOnce(&D) -> R + 'static,
        R: IntoExitCode,
    {
        let mut inner = self.inner.borrow_mut();
        let index = inner.registry.register(
            Box::new(move |data: &D| callback(data).into_exit_code()),
            options,
            data,
        )?;
        debug!(index, "registered unit");
        Ok(index)
    }

    pub fn is_running(&self) -> bool {
        self.inner.borrow().registry.has_run()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().registry.is_empty()
    }

    /// Fork every registered unit and wait for all of them.
    ///
    /// Returns once no spawned child is left. With the default fork failure
    /// policy the first fork failure stops spawning; the children already
    /// running are still reaped and their outcomes travel inside
    /// [`SupervisorError::ForkFailed`].
    pub fn run(self) -> SupervisorResult<Outcomes> {
        self.run_with(launcher::launch::<D>)
    }

    fn run_with<L>(self, launch: L) -> SupervisorResult<Outcomes>
    where
        L: FnMut(WorkUnit<D>, &mut ChildSetup) -> Result<Launched<D>, LaunchFailed<D>>,
    {
        // release the borrow before forking: children may touch their copy
        let (units, mut hooks) = {
            let mut inner = self.inner.borrow_mut();
            let units = inner.registry.freeze()?;
            (units, std::mem::take(&mut inner.hooks))
        };
        drop(self);

        info!(units = units.len(), "starting fork batch");
        let keys: Vec<UnitKey> = units.iter().map(|unit| unit.key.clone()).collect();

        let mut wakeups = Wakeups::register()?;
        hooks.child.signal_mask = Some(wakeups.previous_mask());
        let mut reaper = Reaper::supervising();
        let mut timeouts = TimeoutTable::new();
        let Spawned {
            data_of,
            unspawned,
            aborted,
        } = spawn_all(units, &mut hooks, &mut reaper, &mut timeouts, launch);

        let mut waiter = NixWaiter;
        let mut sender = KillSender;
        let mut alarm = DeadlineAlarm::new();
        WaitLoop {
            wakeups: &mut wakeups,
            waiter: &mut waiter,
            timeouts: &mut timeouts,
            sender: &mut sender,
            alarm: &mut alarm,
        }
        .run(&mut reaper, |reaped| {
            if let Some(data) = data_of.get(&reaped.index) {
                hooks.child_exited(&reaped.outcome, data);
            }
        })?;

        let outcomes = map_outcomes(reaper.take_outcomes(), &unspawned, &keys);
        match aborted {
            Some((index, unit, source)) => Err(SupervisorError::ForkFailed {
                index,
                unit,
                source,
                reaped: outcomes,
            }),
            None => {
                info!(reaped = outcomes.len(), unspawned = unspawned.len(), "fork batch finished");
                Ok(outcomes)
            }
        }
    }
}

/// Parent-side bookkeeping of the spawning phase
struct Spawned<D> {
    data_of: HashMap<usize, D>,
    /// Indices of units that never got a process
    unspawned: Vec<usize>,
    /// The failure that stopped spawning under [`ForkFailurePolicy::Abort`]
    aborted: Option<(usize, UnitKey, nix::Error)>,
}

/// Launch units in registration order, tracking each child and arming its
/// timeouts as soon as it exists.
fn spawn_all<D, L>(
    units: Vec<WorkUnit<D>>,
    hooks: &mut Hooks<D>,
    reaper: &mut Reaper,
    timeouts: &mut TimeoutTable,
    mut launch: L,
) -> Spawned<D>
where
    L: FnMut(WorkUnit<D>, &mut ChildSetup) -> Result<Launched<D>, LaunchFailed<D>>,
{
    let mut spawned = Spawned {
        data_of: HashMap::new(),
        unspawned: Vec::new(),
        aborted: None,
    };

    let mut pending_units = units.into_iter();
    while let Some(unit) = pending_units.next() {
        let escalations = unit.options.escalations();
        match launch(unit, &mut hooks.child) {
            Ok(launched) => {
                reaper.track(launched.pid, launched.index);
                timeouts.arm_for(launched.pid, &escalations, Instant::now());
                spawned.data_of.insert(launched.index, launched.data);
            }
            Err(failed) => {
                warn!(unit = %failed.key, error = %failed.source, "fork failed");
                spawned.unspawned.push(failed.index);
                match hooks.fork_failed(failed.index, &failed.data) {
                    ForkFailurePolicy::Continue => {
                        debug!(unit = %failed.key, "skipping unit");
                    }
                    ForkFailurePolicy::Abort => {
                        spawned
                            .unspawned
                            .extend(pending_units.by_ref().map(|unit| unit.index));
                        spawned.aborted = Some((failed.index, failed.key, failed.source));
                        break;
                    }
                }
            }
        }
    }
    spawned
}

impl<D: Default + 'static> Supervisor<D> {
    /// Register a unit with default options and data
    pub fn add<F, R>(&self, callback: F) -> SupervisorResult<usize>
    where
        F: FnOnce(&D) -> R + 'static,
        R: IntoExitCode,
    {
        self.register(callback, ForkOptions::default(), D::default())
    }

    /// Register one named unit per `(name, callback)` pair, then run.
    ///
    /// ```no_run
    /// use fork_supervisor::Supervisor;
    ///
    /// let units: Vec<(&str, fn(&()) -> i32)> = vec![("a", |_| 0), ("b", |_| 2)];
    /// let outcomes = Supervisor::<()>::new().fork(units)?;
    /// assert_eq!(outcomes.code("b"), Some(2));
    /// # Ok::<(), fork_supervisor::SupervisorError>(())
    /// ```
    pub fn fork<I, K, F, R>(self, callbacks: I) -> SupervisorResult<Outcomes>
    where
        I: IntoIterator<Item = (K, F)>,
        K: Into<String>,
        F: FnOnce(&D) -> R + 'static,
        R: IntoExitCode,
    {
        for (name, callback) in callbacks {
            self.register(callback, ForkOptions::new().name(name), D::default())?;
        }
        self.run()
    }
}
