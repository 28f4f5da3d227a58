//! Exit outcomes and the caller-facing result mapping

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// How a forked unit ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The process exited on its own with this code
    Exited(i32),
    /// The process was terminated by this signal
    Signaled(Signal),
}

impl ExitOutcome {
    /// Decode a terminal wait status. Stopped/continued and the other
    /// non-terminal states yield `None`.
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(Self::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Some(Self::Signaled(signal)),
            _ => None,
        }
    }

    /// Single signed integer for the caller: the exit code, or the negated
    /// signal number when the process was killed by a signal.
    pub fn code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled(signal) => -(*signal as i32),
        }
    }

    pub fn is_signaled(&self) -> bool {
        matches!(self, Self::Signaled(_))
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {}", code),
            Self::Signaled(signal) => write!(f, "terminated by {}", signal),
        }
    }
}

/// Conversion of a unit callback's return value into a process exit code.
///
/// Values outside `0..=255` are truncated by the OS the usual way.
pub trait IntoExitCode {
    fn into_exit_code(self) -> i32;
}

impl IntoExitCode for () {
    fn into_exit_code(self) -> i32 {
        0
    }
}

impl IntoExitCode for i32 {
    fn into_exit_code(self) -> i32 {
        self
    }
}

impl IntoExitCode for u8 {
    fn into_exit_code(self) -> i32 {
        i32::from(self)
    }
}

impl IntoExitCode for bool {
    fn into_exit_code(self) -> i32 {
        if self {
            0
        } else {
            1
        }
    }
}

impl IntoExitCode for ExitOutcome {
    fn into_exit_code(self) -> i32 {
        self.code()
    }
}

impl<T: IntoExitCode, E: fmt::Debug> IntoExitCode for Result<T, E> {
    fn into_exit_code(self) -> i32 {
        match self {
            Ok(value) => value.into_exit_code(),
            Err(e) => {
                eprintln!("Error: {:?}", e);
                1
            }
        }
    }
}

/// Caller-facing identifier of a unit: its registered name, or its
/// position when it was registered without one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnitKey {
    Name(String),
    Index(usize),
}

impl UnitKey {
    /// Text handed to the process-title hook
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(index) => write!(f, "{}", index),
        }
    }
}

impl From<usize> for UnitKey {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for UnitKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for UnitKey {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// Outcomes of one batch, keyed by unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcomes {
    by_unit: HashMap<UnitKey, ExitOutcome>,
    unspawned: Vec<UnitKey>,
}

impl Outcomes {
    pub fn get(&self, key: impl Into<UnitKey>) -> Option<ExitOutcome> {
        self.by_unit.get(&key.into()).copied()
    }

    /// Signed code of one unit (see [`ExitOutcome::code`])
    pub fn code(&self, key: impl Into<UnitKey>) -> Option<i32> {
        self.get(key).map(|outcome| outcome.code())
    }

    /// The `unit -> signed code` mapping
    pub fn codes(&self) -> HashMap<UnitKey, i32> {
        self.by_unit
            .iter()
            .map(|(key, outcome)| (key.clone(), outcome.code()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UnitKey, &ExitOutcome)> {
        self.by_unit.iter()
    }

    pub fn len(&self) -> usize {
        self.by_unit.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_unit.is_empty()
    }

    /// Units that never got a process, in registration order: each unit
    /// skipped under [`crate::ForkFailurePolicy::Continue`], or under
    /// `Abort` the unit whose fork failed and every unit after it.
    pub fn unspawned(&self) -> &[UnitKey] {
        &self.unspawned
    }
}

impl IntoIterator for Outcomes {
    type Item = (UnitKey, ExitOutcome);
    type IntoIter = std::collections::hash_map::IntoIter<UnitKey, ExitOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.by_unit.into_iter()
    }
}

/// Translate index-keyed outcomes into caller keys.
///
/// `keys[i]` is the key of the unit registered at index `i`. Every index in
/// `unspawned` is reported through [`Outcomes::unspawned`] instead.
pub(crate) fn map_outcomes(
    indexed: BTreeMap<usize, ExitOutcome>,
    unspawned: &[usize],
    keys: &[UnitKey],
) -> Outcomes {
    let key_of = |index: usize| keys.get(index).cloned().unwrap_or(UnitKey::Index(index));

    Outcomes {
        by_unit: indexed
            .into_iter()
            .map(|(index, outcome)| (key_of(index), outcome))
            .collect(),
        unspawned: unspawned.iter().map(|&index| key_of(index)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_wait_status_decoding() {
        let pid = Pid::from_raw(4242);

        assert_eq!(
            ExitOutcome::from_wait_status(WaitStatus::Exited(pid, 3)),
            Some(ExitOutcome::Exited(3))
        );
        assert_eq!(
            ExitOutcome::from_wait_status(WaitStatus::Signaled(pid, Signal::SIGTERM, false)),
            Some(ExitOutcome::Signaled(Signal::SIGTERM))
        );
        assert_eq!(
            ExitOutcome::from_wait_status(WaitStatus::Stopped(pid, Signal::SIGSTOP)),
            None
        );
        assert_eq!(ExitOutcome::from_wait_status(WaitStatus::StillAlive), None);
    }

    #[test]
    fn test_signed_code_convention() {
        assert_eq!(ExitOutcome::Exited(0).code(), 0);
        assert_eq!(ExitOutcome::Exited(2).code(), 2);
        assert_eq!(ExitOutcome::Signaled(Signal::SIGTERM).code(), -15);
        assert_eq!(ExitOutcome::Signaled(Signal::SIGKILL).code(), -9);
        assert_eq!(ExitOutcome::Signaled(Signal::SIGALRM).code(), -14);

        assert!(ExitOutcome::Signaled(Signal::SIGKILL).is_signaled());
        assert!(!ExitOutcome::Exited(137).is_signaled());
    }

    #[test]
    fn test_exit_code_coercion() {
        assert_eq!(().into_exit_code(), 0);
        assert_eq!(7i32.into_exit_code(), 7);
        assert_eq!(255u8.into_exit_code(), 255);
        assert_eq!(true.into_exit_code(), 0);
        assert_eq!(false.into_exit_code(), 1);

        let ok: Result<i32, String> = Ok(4);
        assert_eq!(ok.into_exit_code(), 4);
        let failed: Result<(), String> = Err("boom".into());
        assert_eq!(failed.into_exit_code(), 1);
    }

    #[test]
    fn test_map_outcomes_uses_registered_keys() {
        let keys = vec![
            UnitKey::from("a"),
            UnitKey::Index(1),
            UnitKey::from("c"),
        ];
        let mut indexed = BTreeMap::new();
        indexed.insert(2, ExitOutcome::Exited(3));
        indexed.insert(0, ExitOutcome::Exited(0));

        let outcomes = map_outcomes(indexed, &[1], &keys);

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes.code("a"), Some(0));
        assert_eq!(outcomes.code("c"), Some(3));
        assert_eq!(outcomes.get(1usize), None);
        assert_eq!(outcomes.unspawned(), &[UnitKey::Index(1)]);
    }

    #[test]
    fn test_codes_mapping() {
        let keys = vec![UnitKey::from("term")];
        let mut indexed = BTreeMap::new();
        indexed.insert(0, ExitOutcome::Signaled(Signal::SIGTERM));

        let codes = map_outcomes(indexed, &[], &keys).codes();
        assert_eq!(codes.get(&UnitKey::from("term")), Some(&-15));
    }
}
