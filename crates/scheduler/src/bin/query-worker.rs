//! query-worker — demo worker loop driving synthetic query tasks through
//! the admission schedulers.
//!
//! Each synthetic task runs a CPU phase followed by a remote-I/O phase, each
//! gated by its resource class. A monitoring loop periodically snapshots all
//! schedulers, the same view a diagnostics endpoint would expose.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, warn};

use quarry_core::config::{load_dotenv, Config};
use quarry_scheduler::{
    bind_current, run_scheduled, ResourceClass, SchedulerRegistry, Task, TaskMeta,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Synthetic query workload for exercising the admission schedulers.
#[derive(Parser, Debug)]
#[command(name = "query-worker", version, about)]
struct Cli {
    /// Number of synthetic tasks to run.
    #[arg(long, env = "QUARRY_DEMO_TASKS", default_value_t = 64)]
    tasks: usize,

    /// CPU phase duration per task, in milliseconds.
    #[arg(long, env = "QUARRY_DEMO_WORK_MS", default_value_t = 20)]
    work_ms: u64,

    /// Remote-I/O phase duration per task, in milliseconds.
    #[arg(long, env = "QUARRY_DEMO_IO_MS", default_value_t = 10)]
    io_ms: u64,

    /// Override QUARRY_CPU_SLOTS.
    #[arg(long)]
    cpu_slots: Option<usize>,

    /// Override QUARRY_REMOTE_IO_SLOTS.
    #[arg(long)]
    io_slots: Option<usize>,

    /// Print task snapshots as JSON while running.
    #[arg(long, default_value_t = false)]
    dump_snapshots: bool,
}

// ── main ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(n) = cli.cpu_slots {
        config.scheduler.cpu_slots = n;
    }
    if let Some(n) = cli.io_slots {
        config.scheduler.remote_io_slots = n;
    }
    config.log_summary();

    let registry = Arc::new(SchedulerRegistry::new(&config.scheduler));
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.worker.resolved_threads())
        .thread_name(|i| format!("query-worker-{i}"))
        .build()?;

    let completed = Arc::new(AtomicUsize::new(0));
    let long_task_warn = config.scheduler.long_task_warn();
    let started = Instant::now();

    info!(tasks = cli.tasks, "submitting synthetic workload");
    for i in 0..cli.tasks {
        let registry = Arc::clone(&registry);
        let completed = Arc::clone(&completed);
        let (work_ms, io_ms) = (cli.work_ms, cli.io_ms);
        pool.spawn(move || {
            let task = Task::create(
                format!("user{}", i % 4),
                "query-worker",
                None,
                None,
                TaskMeta {
                    dataset: Some("synthetic".to_string()),
                    shard_name: Some(format!("shard{:02}", i % 8)),
                    num_docs: Some(1_000),
                },
            );
            let _binding = bind_current(Arc::clone(&task), long_task_warn);

            let cpu = registry.get(ResourceClass::Cpu);
            if let Err(e) = run_scheduled(cpu, &task, || spin(Duration::from_millis(work_ms))) {
                warn!(task = %task, error = %e, "cpu phase not admitted");
                return;
            }

            let io = registry.get(ResourceClass::RemoteIo);
            if let Err(e) = run_scheduled(io, &task, || {
                std::thread::sleep(Duration::from_millis(io_ms))
            }) {
                warn!(task = %task, error = %e, "io phase not admitted");
                return;
            }

            completed.fetch_add(1, Ordering::Relaxed);
        });
    }

    // Monitoring loop: what a diagnostics endpoint would report.
    while completed.load(Ordering::Relaxed) < cli.tasks {
        std::thread::sleep(Duration::from_millis(500));
        let snapshots = registry.snapshot_all(false);
        let running = snapshots.iter().filter(|s| s.is_running()).count();
        info!(
            active = snapshots.len(),
            running,
            waiting = snapshots.len() - running,
            done = completed.load(Ordering::Relaxed),
            "scheduler status"
        );
        if cli.dump_snapshots {
            println!("{}", serde_json::to_string_pretty(&snapshots)?);
        }
    }

    info!(
        tasks = cli.tasks,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "workload complete"
    );
    Ok(())
}

/// Burn CPU for roughly `duration` without sleeping.
fn spin(duration: Duration) {
    let end = Instant::now() + duration;
    while Instant::now() < end {
        std::hint::spin_loop();
    }
}
