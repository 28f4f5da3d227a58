//! Per-unit options, built the same way the rest of the crate builds things

use nix::sys::signal::Signal;
use std::time::Duration;

/// One timeout: deliver `signal` once `after` has elapsed since the fork
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalation {
    pub signal: Signal,
    pub after: Duration,
}

impl Escalation {
    pub fn new(signal: Signal, after: Duration) -> Self {
        Self { signal, after }
    }
}

/// Options recognised for a registered unit. Everything is optional; the
/// default is an unnamed unit with no title override and no timeout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForkOptions {
    name: Option<String>,
    process_title: Option<String>,
    timeout: Option<Duration>,
    timeouts: Vec<Escalation>,
}

impl ForkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the unit; the outcome is then reported under this name instead
    /// of the registration index.
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Title applied in the child before the callback runs
    pub fn process_title<S: Into<String>>(mut self, title: S) -> Self {
        self.process_title = Some(title.into());
        self
    }

    /// Send SIGTERM once `duration` has elapsed
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Send `signal` once `after` has elapsed. May be called several times;
    /// every entry fires independently of the others and of `timeout`.
    pub fn escalate(mut self, signal: Signal, after: Duration) -> Self {
        self.timeouts.push(Escalation::new(signal, after));
        self
    }

    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn get_process_title(&self) -> Option<&str> {
        self.process_title.as_deref()
    }

    /// All timeouts to arm for this unit: the explicit escalations followed
    /// by the `timeout` shorthand.
    pub fn escalations(&self) -> Vec<Escalation> {
        let mut entries = self.timeouts.clone();
        if let Some(after) = self.timeout {
            entries.push(Escalation::new(Signal::SIGTERM, after));
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_have_no_timeouts() {
        let options = ForkOptions::default();
        assert!(options.escalations().is_empty());
        assert_eq!(options.get_name(), None);
        assert_eq!(options.get_process_title(), None);
    }

    #[test]
    fn test_timeout_is_sigterm_shorthand() {
        let options = ForkOptions::new().timeout(Duration::from_secs(1));
        assert_eq!(
            options.escalations(),
            vec![Escalation::new(Signal::SIGTERM, Duration::from_secs(1))]
        );
    }

    #[test]
    fn test_timeout_and_escalations_combine() {
        let options = ForkOptions::new()
            .escalate(Signal::SIGTERM, Duration::from_secs(1))
            .escalate(Signal::SIGHUP, Duration::from_secs(1))
            .escalate(Signal::SIGQUIT, Duration::from_secs(3))
            .timeout(Duration::from_secs(2));

        let entries = options.escalations();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[2].signal, Signal::SIGQUIT);
        assert_eq!(
            entries[3],
            Escalation::new(Signal::SIGTERM, Duration::from_secs(2))
        );
    }

    #[test]
    fn test_builder_chain() {
        let options = ForkOptions::new().name("indexer").process_title("worker (indexer)");
        assert_eq!(options.get_name(), Some("indexer"));
        assert_eq!(options.get_process_title(), Some("worker (indexer)"));
    }
}
