//! # rmsched command-line front end
//!
//! Two ways to drive the scheduler:
//!
//! | Mode    | Backend            | Input                                   |
//! |---------|--------------------|-----------------------------------------|
//! | `serve` | `RecordingControl` | control-plane lines from a file or stdin |
//! | `demo`  | `HostThreads`      | in-process periodic worker threads       |
//!
//! In `serve` mode a line reading `S` (or `status`) prints the status
//! listing; every other line is handed to the control plane unchanged.
//!
//! The `demo` workers behave like a well-mannered periodic client: register
//! over the control plane, confirm admission by reading status, run a fixed
//! number of jobs yielding after each, then unregister.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use rmsched::arch::host::{HostThread, HostThreads};
use rmsched::arch::recording::RecordingControl;
use rmsched::config::{DEFAULT_ADMISSION_BOUND, DEFAULT_RT_LEVEL};
use rmsched::control::{parse_status, Command, ControlPlane};
use rmsched::{Kernel, SchedulerConfig, TaskId};

/// First synthetic thread id handed out to demo workers.
const DEMO_FIRST_ID: u32 = 1000;

#[derive(Debug, Parser)]
#[command(name = "rmsched", version, about = "Rate-Monotonic periodic task scheduler")]
struct Cli {
    /// Admission bound in thousandths of a CPU.
    #[arg(long, env = "RMSCHED_BOUND", default_value_t = DEFAULT_ADMISSION_BOUND, global = true)]
    bound: u64,

    /// Real-time level given to the dispatched task.
    #[arg(long = "rt-level", env = "RMSCHED_RT_LEVEL", default_value_t = DEFAULT_RT_LEVEL, global = true)]
    rt_level: u8,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Feed control-plane requests to a scheduler with no real threads.
    Serve {
        /// Read requests from this file instead of stdin.
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Run periodic worker threads under the scheduler.
    Demo {
        /// Worker contract as PERIOD_MS:COMPUTATION_MS. Repeatable.
        #[arg(long = "task", value_parser = parse_task_spec, default_values = ["300:60", "500:100"])]
        tasks: Vec<TaskSpec>,

        /// Jobs each worker runs before unregistering.
        #[arg(long, default_value_t = 5)]
        jobs: u32,
    },
}

#[derive(Debug, Clone, Copy)]
struct TaskSpec {
    period_ms: u64,
    computation_ms: u64,
}

fn parse_task_spec(raw: &str) -> Result<TaskSpec, String> {
    let (period, computation) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected PERIOD_MS:COMPUTATION_MS, got {raw:?}"))?;
    let period_ms = period.trim().parse().map_err(|e| format!("period: {e}"))?;
    let computation_ms = computation.trim().parse().map_err(|e| format!("computation: {e}"))?;
    Ok(TaskSpec {
        period_ms,
        computation_ms,
    })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = SchedulerConfig::default()
        .with_admission_bound(cli.bound)
        .with_realtime_level(cli.rt_level);

    match cli.mode {
        Mode::Serve { input } => serve(config, input),
        Mode::Demo { tasks, jobs } => demo(config, &tasks, jobs),
    }
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

fn serve(config: SchedulerConfig, input: Option<PathBuf>) -> Result<()> {
    let reader: Box<dyn BufRead> = match &input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let kernel = Kernel::start(config, Arc::new(RecordingControl::permissive().verbose()))
        .context("starting scheduler")?;
    let channel = ControlPlane::new(&kernel);
    let mut stdout = io::stdout().lock();

    for line in reader.lines() {
        let line = line.context("reading control-plane input")?;
        match line.trim() {
            "S" | "status" => {
                stdout.write_all(channel.read_status().as_bytes())?;
                stdout.flush()?;
            }
            _ => {
                channel.write(&line);
            }
        }
    }

    kernel.shutdown();
    Ok(())
}

// ---------------------------------------------------------------------------
// demo
// ---------------------------------------------------------------------------

fn demo(config: SchedulerConfig, tasks: &[TaskSpec], jobs: u32) -> Result<()> {
    if tasks.is_empty() {
        bail!("demo needs at least one --task");
    }

    let host = Arc::new(HostThreads::new());
    let kernel = Kernel::start(config, host.clone()).context("starting scheduler")?;

    let outcomes = thread::scope(|scope| -> io::Result<Vec<bool>> {
        let workers: Vec<_> = tasks
            .iter()
            .enumerate()
            .map(|(i, &spec)| {
                let id = TaskId(DEMO_FIRST_ID + i as u32);
                let handle = host.attach(id);
                let (kernel, host) = (&kernel, &host);
                thread::Builder::new()
                    .name(format!("worker-{id}"))
                    .spawn_scoped(scope, move || {
                        let ok = run_worker(kernel, &handle, spec, jobs);
                        host.detach(id);
                        ok
                    })
            })
            .collect::<io::Result<_>>()?;

        Ok(workers
            .into_iter()
            .map(|w| w.join().unwrap_or(false))
            .collect())
    })
    .context("spawning demo workers")?;

    kernel.shutdown();

    let completed = outcomes.iter().filter(|&&ok| ok).count();
    info!("{} of {} workers completed", completed, outcomes.len());
    Ok(())
}

/// One periodic client. Returns whether it was admitted and cleanly
/// unregistered.
fn run_worker(kernel: &Kernel, handle: &HostThread, spec: TaskSpec, jobs: u32) -> bool {
    let id = handle.id();
    let channel = ControlPlane::new(kernel);

    channel.write(
        &Command::Register {
            id,
            period_ms: spec.period_ms,
            computation_ms: spec.computation_ms,
        }
        .to_line(),
    );
    if !parse_status(&channel.read_status()).contains(&id) {
        warn!("worker {}: not admitted", id);
        return false;
    }

    let yield_line = Command::Yield(id).to_line();
    let computation = Duration::from_millis(spec.computation_ms);
    for job in 0..jobs {
        handle.wait_dispatched();
        let started = Instant::now();
        let result = busy_work(computation);
        info!(
            "worker {}: job {} done in {:?} ({})",
            id,
            job,
            started.elapsed(),
            result
        );
        channel.write(&yield_line);
    }

    channel.write(&Command::Unregister(id).to_line());
    let gone = !parse_status(&channel.read_status()).contains(&id);
    if !gone {
        warn!("worker {}: still registered after unregister", id);
    }
    gone
}

/// Burn CPU for roughly `budget` computing factorials.
fn busy_work(budget: Duration) -> u64 {
    let started = Instant::now();
    let mut acc = 0u64;
    let mut n = 0u64;
    while started.elapsed() < budget {
        n = (n + 1) % 20;
        let factorial = (1..=n).product::<u64>();
        acc = std::hint::black_box(acc.wrapping_add(factorial));
    }
    acc
}
