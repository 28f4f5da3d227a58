//! Benchmarks for the timeout table scan

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fork_supervisor::options::Escalation;
use fork_supervisor::timeout::{Alarm, SignalSender};
use fork_supervisor::{Signal, SupervisorResult, TimeoutTable};
use nix::unistd::Pid;
use std::time::{Duration, Instant};

struct NullSender;

impl SignalSender for NullSender {
    fn send(&mut self, _pid: Pid, _signal: Signal) -> SupervisorResult<bool> {
        Ok(true)
    }
}

struct NullAlarm;

impl Alarm for NullAlarm {
    fn arm(&mut self, _after: Duration) -> SupervisorResult<()> {
        Ok(())
    }

    fn disarm(&mut self) -> SupervisorResult<()> {
        Ok(())
    }

    fn remaining(&self, _now: Instant) -> Option<Duration> {
        None
    }
}

fn table(children: i32, now: Instant) -> TimeoutTable {
    let escalations = [
        Escalation::new(Signal::SIGTERM, Duration::from_secs(10)),
        Escalation::new(Signal::SIGKILL, Duration::from_secs(20)),
    ];
    let mut table = TimeoutTable::new();
    for pid in 1..=children {
        table.arm_for(Pid::from_raw(pid), &escalations, now);
    }
    table
}

fn benchmark_recompute_nothing_due(c: &mut Criterion) {
    let mut group = c.benchmark_group("recompute_nothing_due");
    for children in [8, 64, 512] {
        let now = Instant::now();
        let mut table = table(children, now);
        group.bench_with_input(BenchmarkId::from_parameter(children), &children, |b, _| {
            b.iter(|| {
                let next = table.recompute_and_arm(black_box(now), &mut NullSender, &mut NullAlarm);
                let _ = black_box(next);
            });
        });
    }
    group.finish();
}

fn benchmark_fire_all_due(c: &mut Criterion) {
    c.bench_function("fire_all_due_64", |b| {
        b.iter_batched(
            || {
                let now = Instant::now();
                (table(64, now), now + Duration::from_secs(30))
            },
            |(mut table, later)| {
                let fired = table.fire_due(later, &mut NullSender);
                black_box(fired)
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, benchmark_recompute_nothing_due, benchmark_fire_all_due);
criterion_main!(benches);
