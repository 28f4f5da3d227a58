//! Ordered registry of work units and the run-state flag that freezes it

use crate::errors::{SupervisorError, SupervisorResult};
use crate::options::ForkOptions;
use crate::outcome::UnitKey;
use std::collections::HashSet;
use std::fmt;

/// A unit callback after its return value was coerced to an exit code
pub type UnitCallback<D> = Box<dyn FnOnce(&D) -> i32>;

/// One registered unit of work
pub struct WorkUnit<D> {
    pub index: usize,
    pub key: UnitKey,
    pub callback: UnitCallback<D>,
    pub options: ForkOptions,
    pub data: D,
}

impl<D> fmt::Debug for WorkUnit<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnit")
            .field("index", &self.index)
            .field("key", &self.key)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Units in registration order. Once frozen, every further registration
/// fails with [`SupervisorError::AlreadyRunning`].
pub struct Registry<D> {
    units: Vec<WorkUnit<D>>,
    names: HashSet<String>,
    next_index: usize,
    has_run: bool,
}

impl<D> Default for Registry<D> {
    fn default() -> Self {
        Self {
            units: Vec::new(),
            names: HashSet::new(),
            next_index: 0,
            has_run: false,
        }
    }
}

impl<D> Registry<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_run(&self) -> bool {
        self.has_run
    }

    pub fn ensure_open(&self) -> SupervisorResult<()> {
        if self.has_run {
            return Err(SupervisorError::AlreadyRunning);
        }
        Ok(())
    }

    /// Append a unit and return its index
    pub fn register(
        &mut self,
        callback: UnitCallback<D>,
        options: ForkOptions,
        data: D,
    ) -> SupervisorResult<usize> {
        self.ensure_open()?;

        let index = self.next_index;
        let key = match options.get_name() {
            Some(name) => {
                if !self.names.insert(name.to_string()) {
                    return Err(SupervisorError::DuplicateUnitName(name.to_string()));
                }
                UnitKey::Name(name.to_string())
            }
            None => UnitKey::Index(index),
        };

        self.units.push(WorkUnit {
            index,
            key,
            callback,
            options,
            data,
        });
        self.next_index += 1;
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Mark the registry as running and hand out its units, in order
    pub fn freeze(&mut self) -> SupervisorResult<Vec<WorkUnit<D>>> {
        self.ensure_open()?;
        self.has_run = true;
        Ok(std::mem::take(&mut self.units))
    }
}
