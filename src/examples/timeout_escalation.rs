use anyhow::{Context, Result};
use fork_supervisor::{ForkOptions, Signal, Supervisor};
use nix::sys::signal::{signal, SigHandler};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// タイムアウトによるシグナルのエスカレーション例
///
/// The unit ignores SIGTERM, so the first deadline has no effect and the
/// second one kills it with SIGKILL.
///
/// # Example Output
///
/// ```text
/// stubborn: -9 (terminated by SIGKILL) after 2.0s
/// ```
fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let supervisor = Supervisor::new();
    supervisor.register::<_, ()>(
        |_| {
            // SAFETY: SigIgn installs no Rust handler
            let _ = unsafe { signal(Signal::SIGTERM, SigHandler::SigIgn) };
            loop {
                sleep(Duration::from_millis(100));
            }
        },
        ForkOptions::new()
            .name("stubborn")
            .timeout(Duration::from_secs(1))
            .escalate(Signal::SIGKILL, Duration::from_secs(2)),
        (),
    )?;

    let started = Instant::now();
    let outcomes = supervisor.run().context("supervised run failed")?;
    let elapsed = started.elapsed();

    if let Some(outcome) = outcomes.get("stubborn") {
        println!("stubborn: {} ({}) after {:.1}s", outcome.code(), outcome, elapsed.as_secs_f64());
    }
    info!("done");
    Ok(())
}
