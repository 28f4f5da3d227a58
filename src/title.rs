//! Process title capability
//!
//! Reading and writing the OS-level process title is global state, so the
//! launcher receives it as an object instead of calling free functions.
//! Title support is best effort: platforms without it are silently ignored.

use crate::outcome::UnitKey;
use std::io;

/// Access to the title of the current process
#[cfg_attr(test, mockall::automock)]
pub trait ProcessTitle {
    /// Current title, if the platform can report one
    fn current(&self) -> Option<String>;

    /// Replace the title
    fn set(&mut self, title: &str) -> io::Result<()>;
}

/// Hook computing a new title from the existing one and the unit label.
/// Returning `None` leaves the title untouched.
pub type TitleHook = dyn Fn(&str, &UnitKey) -> Option<String>;

/// The real process title.
///
/// On Linux this is the kernel task name (`PR_SET_NAME`), which the kernel
/// truncates to 15 bytes. Elsewhere titles are unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTitle;

#[cfg(target_os = "linux")]
impl ProcessTitle for SystemProcessTitle {
    fn current(&self) -> Option<String> {
        nix::sys::prctl::get_name()
            .ok()
            .map(|name| name.to_string_lossy().into_owned())
    }

    fn set(&mut self, title: &str) -> io::Result<()> {
        let name = std::ffi::CString::new(title)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        nix::sys::prctl::set_name(&name).map_err(io::Error::from)
    }
}

#[cfg(not(target_os = "linux"))]
impl ProcessTitle for SystemProcessTitle {
    fn current(&self) -> Option<String> {
        None
    }

    fn set(&mut self, _title: &str) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process titles are not supported on this platform",
        ))
    }
}

/// Quote one argument for a POSIX shell
fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// The title a hook sees as "existing": the current title, or the quoted
/// command line when the platform reports none.
pub fn existing_title(title: &dyn ProcessTitle) -> String {
    title
        .current()
        .filter(|current| !current.is_empty())
        .unwrap_or_else(|| {
            std::env::args()
                .map(|arg| shell_quote(&arg))
                .collect::<Vec<_>>()
                .join(" ")
        })
}

/// Decide and apply the title of a freshly forked unit.
///
/// An explicit per-unit title wins; otherwise the hook is asked. Failures
/// to set the title are ignored. Returns the title that was chosen.
pub fn apply_process_title(
    title: &mut dyn ProcessTitle,
    explicit: Option<&str>,
    hook: Option<&TitleHook>,
    unit: &UnitKey,
) -> Option<String> {
    let chosen = match explicit {
        Some(explicit) => Some(explicit.to_string()),
        None => hook.and_then(|hook| hook(&existing_title(&*title), unit)),
    }
    .filter(|chosen| !chosen.is_empty())?;

    let _ = title.set(&chosen);
    Some(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[test]
    fn test_explicit_title_wins_over_hook() {
        let mut title = MockProcessTitle::new();
        title.expect_current().never();
        title
            .expect_set()
            .with(eq("batch (zero)"))
            .times(1)
            .returning(|_| Ok(()));

        let hook: Box<TitleHook> = Box::new(|_, _| Some("from hook".to_string()));
        let chosen = apply_process_title(
            &mut title,
            Some("batch (zero)"),
            Some(&*hook),
            &UnitKey::from("zero"),
        );
        assert_eq!(chosen.as_deref(), Some("batch (zero)"));
    }

    #[test]
    fn test_hook_receives_existing_title_and_unit() {
        let mut title = MockProcessTitle::new();
        title
            .expect_current()
            .returning(|| Some("batch".to_string()));
        title
            .expect_set()
            .with(eq("batch: indexer"))
            .times(1)
            .returning(|_| Ok(()));

        let hook: Box<TitleHook> =
            Box::new(|existing, unit| Some(format!("{}: {}", existing, unit)));
        let chosen = apply_process_title(&mut title, None, Some(&*hook), &UnitKey::from("indexer"));
        assert_eq!(chosen.as_deref(), Some("batch: indexer"));
    }

    #[test]
    fn test_unsupported_platform_is_ignored() {
        let mut title = MockProcessTitle::new();
        title.expect_set().returning(|_| {
            Err(io::Error::new(io::ErrorKind::Unsupported, "no titles"))
        });

        let chosen = apply_process_title(&mut title, Some("worker"), None, &UnitKey::Index(0));
        assert_eq!(chosen.as_deref(), Some("worker"));
    }

    #[test]
    fn test_nothing_configured_leaves_title_alone() {
        let mut title = MockProcessTitle::new();
        title.expect_set().never();

        assert_eq!(apply_process_title(&mut title, None, None, &UnitKey::Index(3)), None);

        let hook: Box<TitleHook> = Box::new(|_, _| None);
        title.expect_current().returning(|| None);
        assert_eq!(
            apply_process_title(&mut title, None, Some(&*hook), &UnitKey::Index(3)),
            None
        );
    }

    #[test]
    fn test_existing_title_falls_back_to_command_line() {
        let mut title = MockProcessTitle::new();
        title.expect_current().returning(|| None);

        let existing = existing_title(&title);
        assert!(existing.starts_with('\''));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
