//! throughput: hammers one container from several threads and reports operations per second.
//!
//! Every thread alternates a push and a pop, so the container stays near its prefill level.
//!
//! ```bash
//! RUST_LOG=debug throughput --structure elimination --threads 8 --ops 1000000
//! ```

use std::thread::scope;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bounded_lockfree::{EliminationStack, RingQueue, TreiberStack};

const QUEUE_CAPACITY: usize = 1024;
const TREIBER_CAPACITY: usize = 16384;
const ELIMINATION_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Structure {
    Queue,
    Treiber,
    Elimination,
}

/// Measure the throughput of a lock-free container under alternating push/pop load.
#[derive(Parser, Debug)]
#[command(name = "throughput")]
struct Cli {
    /// Container to measure.
    #[arg(long, value_enum, default_value_t = Structure::Treiber)]
    structure: Structure,

    /// Number of worker threads.
    #[arg(long, default_value_t = 8)]
    threads: usize,

    /// Operations per thread; half pushes, half pops.
    #[arg(long, default_value_t = 1_000_000)]
    ops: usize,

    /// Values pushed from the main thread before the workers start.
    #[arg(long, default_value_t = 100)]
    prefill: usize,
}

/// The two operations the workers need, over `usize` payloads.
trait Container: Sync {
    fn push(&self, value: usize) -> bool;
    fn pop(&self) -> Option<usize>;
}

impl<const N: usize> Container for RingQueue<usize, N> {
    fn push(&self, value: usize) -> bool {
        RingQueue::push(self, value).is_ok()
    }

    fn pop(&self) -> Option<usize> {
        RingQueue::pop(self)
    }
}

impl<const N: usize> Container for TreiberStack<usize, N> {
    fn push(&self, value: usize) -> bool {
        TreiberStack::push(self, value).is_ok()
    }

    fn pop(&self) -> Option<usize> {
        TreiberStack::pop(self)
    }
}

impl<const N: usize> Container for EliminationStack<usize, N> {
    fn push(&self, value: usize) -> bool {
        EliminationStack::push(self, value).is_ok()
    }

    fn pop(&self) -> Option<usize> {
        EliminationStack::pop(self)
    }
}

#[derive(Debug, Default)]
struct Report {
    elapsed: Duration,
    pushed: usize,
    popped: usize,
    full: usize,
    empty: usize,
}

/// Value pushed by thread `t` at step `i`. Distinct per thread as long as it does not wrap.
fn payload(t: usize, i: usize, ops: usize) -> usize {
    t.wrapping_mul(ops).wrapping_add(i)
}

fn run(container: &impl Container, cli: &Cli) -> Report {
    let mut prefilled = 0;
    for value in 0..cli.prefill {
        if !container.push(value) {
            warn!(prefill = cli.prefill, prefilled, "container full while prefilling");
            break;
        }
        prefilled += 1;
    }

    let start = Instant::now();
    let reports: Vec<Report> = scope(|s| {
        let workers: Vec<_> = (0..cli.threads)
            .map(|t| {
                s.spawn(move || {
                    let mut report = Report::default();
                    for i in 0..cli.ops {
                        if i % 2 == 0 {
                            if container.push(payload(t, i, cli.ops)) {
                                report.pushed += 1;
                            } else {
                                report.full += 1;
                            }
                        } else if container.pop().is_some() {
                            report.popped += 1;
                        } else {
                            report.empty += 1;
                        }
                    }
                    report
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| {
                worker.join().unwrap_or_else(|_| {
                    warn!("worker panicked; its counts are lost");
                    Report::default()
                })
            })
            .collect()
    });
    let elapsed = start.elapsed();

    let mut total = reports.into_iter().fold(Report::default(), |acc, r| Report {
        elapsed: acc.elapsed,
        pushed: acc.pushed + r.pushed,
        popped: acc.popped + r.popped,
        full: acc.full + r.full,
        empty: acc.empty + r.empty,
    });
    total.elapsed = elapsed;

    let mut remaining = 0;
    while container.pop().is_some() {
        remaining += 1;
    }
    if prefilled + total.pushed != total.popped + remaining {
        warn!(
            prefilled,
            pushed = total.pushed,
            popped = total.popped,
            remaining,
            "element count mismatch"
        );
    }
    total
}

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_thread_names(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    info!(structure = ?cli.structure, threads = cli.threads, ops = cli.ops, "starting");

    let report = match cli.structure {
        Structure::Queue => run(&RingQueue::<usize, QUEUE_CAPACITY>::new(), &cli),
        Structure::Treiber => run(&TreiberStack::<usize, TREIBER_CAPACITY>::new(), &cli),
        Structure::Elimination => {
            let stack = EliminationStack::<usize, ELIMINATION_CAPACITY>::new();
            let report = run(&stack, &cli);
            info!(eliminated = stack.stats().eliminated, "elimination stats");
            report
        }
    };

    let ops = report.pushed + report.popped + report.full + report.empty;
    let secs = report.elapsed.as_secs_f64();
    info!(
        elapsed_ms = report.elapsed.as_millis() as u64,
        total_ops = ops,
        mops_per_sec = if secs > 0.0 { ops as f64 / secs / 1e6 } else { 0.0 },
        pushed = report.pushed,
        popped = report.popped,
        full = report.full,
        empty = report.empty,
        "done"
    );
}
