//! Forks one OS process per unit and runs the unit in the child
//!
//! The child branch never returns: it ends in `_exit` with the coerced
//! return value of the callback, with [`CHILD_PANIC_EXIT_CODE`] when the
//! callback (or the init hook) panicked, or with [`CHILD_SETUP_EXIT_CODE`]
//! when the child could not restore its signal mask.

use crate::outcome::UnitKey;
use crate::registry::WorkUnit;
use crate::title::{apply_process_title, ProcessTitle, TitleHook};
use nix::sys::signal::SigSet;
use nix::unistd::{fork, ForkResult, Pid};
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

/// Exit code of a child whose callback panicked
pub const CHILD_PANIC_EXIT_CODE: i32 = 101;

/// Exit code of a child that could not undo the parent's signal mask
/// (`EX_OSERR`). The unit is not run.
pub const CHILD_SETUP_EXIT_CODE: i32 = 71;

/// Child-side environment shared by every unit of a batch
pub struct ChildSetup {
    pub title: Box<dyn ProcessTitle>,
    pub title_hook: Option<Box<TitleHook>>,
    pub init: Option<Box<dyn Fn()>>,
    /// Thread mask the child starts from, instead of the supervising
    /// thread's mask with SIGCHLD blocked
    pub signal_mask: Option<SigSet>,
}

/// Parent-side record of a spawned unit
#[derive(Debug)]
pub struct Launched<D> {
    pub pid: Pid,
    pub index: usize,
    pub key: UnitKey,
    pub data: D,
}

/// A unit the OS refused to fork
#[derive(Debug)]
pub struct LaunchFailed<D> {
    pub index: usize,
    pub key: UnitKey,
    pub data: D,
    pub source: nix::Error,
}

/// Fork `unit`. Returns in the parent only.
pub fn launch<D>(unit: WorkUnit<D>, setup: &mut ChildSetup) -> Result<Launched<D>, LaunchFailed<D>> {
    let WorkUnit {
        index,
        key,
        callback,
        options,
        data,
    } = unit;

    // 子プロセスは fork したスレッドだけを引き継ぐ
    // SAFETY: the child only runs the unit and then calls `_exit`; it never
    // returns into code that assumes other threads still exist.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            debug!(pid = %child, unit = %key, "forked unit");
            Ok(Launched {
                pid: child,
                index,
                key,
                data,
            })
        }
        Ok(ForkResult::Child) => {
            if let Some(mask) = &setup.signal_mask {
                if mask.thread_set_mask().is_err() {
                    let _ = writeln!(io::stderr(), "unit {}: cannot restore signal mask", key);
                    exit_child(CHILD_SETUP_EXIT_CODE);
                }
            }

            let code = panic::catch_unwind(AssertUnwindSafe(|| {
                apply_process_title(
                    setup.title.as_mut(),
                    options.get_process_title(),
                    setup.title_hook.as_deref(),
                    &key,
                );
                if let Some(init) = &setup.init {
                    init();
                }
                callback(&data)
            }))
            .unwrap_or(CHILD_PANIC_EXIT_CODE);

            exit_child(code)
        }
        Err(source) => Err(LaunchFailed {
            index,
            key,
            data,
            source,
        }),
    }
}

/// Flush stdio and leave the child without running destructors or atexit
/// handlers inherited from the parent.
fn exit_child(code: i32) -> ! {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
    signal_hook::low_level::exit(code)
}
