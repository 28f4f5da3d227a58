//! Fork supervisor for Rust
//!
//! Runs a flat batch of units as separate Linux/Unix processes, escalates
//! signals to children that outlive their timeouts, and reports every unit's
//! outcome as an exit code or `-signum`.

pub mod errors;
pub mod hooks;
pub mod launcher;
pub mod options;
pub mod outcome;
pub mod reaper;
pub mod registry;
pub mod signal;
pub mod supervisor;
pub mod timeout;
pub mod title;

// Re-export commonly used types
pub use errors::{SupervisorError, SupervisorResult};
pub use hooks::{ForkFailurePolicy, Hooks};
pub use launcher::{CHILD_PANIC_EXIT_CODE, CHILD_SETUP_EXIT_CODE};
pub use options::{Escalation, ForkOptions};
pub use outcome::{ExitOutcome, IntoExitCode, Outcomes, UnitKey};
pub use supervisor::Supervisor;
pub use timeout::TimeoutTable;
pub use title::{ProcessTitle, SystemProcessTitle};

pub use nix::sys::signal::Signal;
