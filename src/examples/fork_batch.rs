use anyhow::{Context, Result};
use fork_supervisor::{ExitOutcome, Hooks, Supervisor};
use std::thread::sleep;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// 名前付きのユニットをまとめて fork する例
///
/// Each unit sleeps a little and exits with its own code. The parent waits
/// for all of them and prints the name -> outcome mapping.
///
/// # Example Output
///
/// ```text
/// child exited: exited with code 0
/// child exited: exited with code 2
/// child exited: exited with code 3
/// a: 0
/// b: 2
/// c: 3
/// ```
fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let hooks = Hooks::<()>::new()
        .on_child_init(|| println!("child {} starting", std::process::id()))
        .process_title(|_, unit| Some(format!("batch: {}", unit)))
        .on_child_exited(|outcome: &ExitOutcome, _| println!("child exited: {}", outcome));

    let units: Vec<(&str, Box<dyn FnOnce(&()) -> i32>)> = vec![
        ("a", Box::new(|_| 0)),
        (
            "b",
            Box::new(|_| {
                sleep(Duration::from_millis(50));
                2
            }),
        ),
        (
            "c",
            Box::new(|_| {
                sleep(Duration::from_millis(100));
                3
            }),
        ),
    ];

    let outcomes = Supervisor::with_hooks(hooks)
        .fork(units)
        .context("fork batch failed")?;

    let mut codes: Vec<_> = outcomes.codes().into_iter().collect();
    codes.sort_by_key(|(key, _)| key.label());
    for (key, code) in codes {
        println!("{}: {}", key, code);
    }
    info!(units = outcomes.len(), "done");
    Ok(())
}
