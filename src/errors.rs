//! Error handling module
//!
//! Uses `thiserror` for library errors with detailed error types
//! that callers can match on and handle appropriately.

use crate::outcome::{Outcomes, UnitKey};
use nix::unistd::Pid;
use std::io;
use thiserror::Error;

/// Errors raised while registering or running a batch of forks
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Registration or a second run after the run started
    #[error("supervisor is already running; use a fresh supervisor for another batch")]
    AlreadyRunning,

    /// Two units registered under the same name
    #[error("a unit named '{0}' is already registered")]
    DuplicateUnitName(String),

    /// The OS refused to create a process for a unit
    ///
    /// `reaped` holds the outcomes of the units that were already running
    /// when the failure happened; they are drained before this error is
    /// returned.
    #[error("could not create fork #{index} ({unit}): {source}")]
    ForkFailed {
        index: usize,
        unit: UnitKey,
        #[source]
        source: nix::Error,
        reaped: Outcomes,
    },

    /// Waiting on a child failed for a reason other than an interruption
    #[error("waiting for child {pid} failed: {source}")]
    Wait {
        pid: Pid,
        #[source]
        source: nix::Error,
    },

    /// Signal delivery failed
    #[error("signal delivery failed: {0}")]
    Signal(String),

    /// IO operation failed
    #[error("IO operation failed: {0}")]
    Io(#[from] io::Error),

    /// Any other OS call failed
    #[error("system call failed: {0}")]
    Nix(#[from] nix::Error),
}

impl SupervisorError {
    /// Whether the error aborts a run, as opposed to a registration mistake
    /// the caller can react to.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::AlreadyRunning | Self::DuplicateUnitName(_))
    }

    /// Outcomes collected before a fatal error, if the error carries any.
    pub fn reaped(&self) -> Option<&Outcomes> {
        match self {
            Self::ForkFailed { reaped, .. } => Some(reaped),
            _ => None,
        }
    }
}

/// Result type alias for supervisor operations
pub type SupervisorResult<T> = Result<T, SupervisorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use nix::errno::Errno;

    #[test]
    fn test_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "pipe");
        let error: SupervisorError = io_error.into();
        assert!(matches!(error, SupervisorError::Io(_)));

        let error: SupervisorError = Errno::EPERM.into();
        assert!(matches!(error, SupervisorError::Nix(Errno::EPERM)));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(!SupervisorError::AlreadyRunning.is_fatal());
        assert!(!SupervisorError::DuplicateUnitName("a".into()).is_fatal());
        assert!(SupervisorError::Signal("EPERM".into()).is_fatal());

        let error = SupervisorError::ForkFailed {
            index: 2,
            unit: UnitKey::Name("worker".into()),
            source: Errno::EAGAIN,
            reaped: Outcomes::default(),
        };
        assert!(error.is_fatal());
        assert!(error.reaped().is_some_and(|r| r.is_empty()));
    }

    #[test]
    fn test_error_display() {
        let error = SupervisorError::ForkFailed {
            index: 1,
            unit: UnitKey::Index(1),
            source: Errno::EAGAIN,
            reaped: Outcomes::default(),
        };
        let message = error.to_string();
        assert!(message.contains("could not create fork #1"));
        assert!(message.contains("EAGAIN"));
    }
}
