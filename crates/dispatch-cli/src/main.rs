use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use dispatch_core::{Dispatcher, DispatcherConfig, DispatcherStats, Task, TaskError};
use rand::Rng;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Push synthetic jobs through a dispatcher and report what happened.
#[derive(Debug, Parser)]
#[command(name = "dispatch", version)]
struct Args {
    /// Dispatcher label used in log records.
    #[arg(long, env = "DISPATCH_ID", default_value = "bench")]
    id: String,

    #[arg(long, env = "DISPATCH_WORKERS", default_value_t = 128)]
    workers: usize,

    /// 0 makes every submission wait for an idle worker.
    #[arg(long, env = "DISPATCH_QUEUE_CAPACITY", default_value_t = 1000)]
    queue_capacity: usize,

    /// Give up on a submission after this long. Waits forever when unset.
    #[arg(long, env = "DISPATCH_SUBMIT_TIMEOUT_MS")]
    submit_timeout_ms: Option<u64>,

    /// Number of jobs to submit.
    #[arg(long, env = "DISPATCH_JOBS", default_value_t = 10_000)]
    jobs: u64,

    /// Base time each job sleeps.
    #[arg(long, env = "DISPATCH_TASK_MS", default_value_t = 20)]
    task_ms: u64,

    /// Extra random sleep, up to this many milliseconds.
    #[arg(long, env = "DISPATCH_JITTER_MS", default_value_t = 0)]
    jitter_ms: u64,

    /// Make every n-th job fail. 0 disables failures.
    #[arg(long, env = "DISPATCH_FAIL_EVERY", default_value_t = 0)]
    fail_every: u64,

    /// Used when RUST_LOG is not set.
    #[arg(long, env = "DISPATCH_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Print the final report as JSON.
    #[arg(long)]
    json: bool,
}

impl Args {
    fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            id: self.id.clone(),
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            submit_timeout_ms: self.submit_timeout_ms,
        }
    }
}

#[derive(Debug, Serialize)]
struct MockMessage<'a> {
    name: &'a str,
}

/// Serializes a small message and sleeps, like a handler doing a bit of I/O.
struct MockWork {
    id: String,
    sleep: Duration,
    fail: bool,
}

#[async_trait]
impl Task for MockWork {
    fn name(&self) -> &str {
        "mock_work"
    }

    async fn execute(self: Box<Self>) -> Result<(), TaskError> {
        let message = MockMessage { name: &self.id };
        serde_json::to_vec(&message).map_err(TaskError::new)?;
        tokio::time::sleep(self.sleep).await;

        if self.fail {
            return Err(TaskError::msg(format!("job {} failed on purpose", self.id)));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct Report {
    submitted: u64,
    rejected: u64,
    elapsed_ms: u128,
    jobs_per_sec: f64,
    stats: DispatcherStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.dispatcher_config();
    config.validate().context("invalid dispatcher settings")?;
    let dispatcher = Dispatcher::from_config(&config)?;

    tracing::info!(jobs = args.jobs, workers = config.workers, "running jobs");
    let started = Instant::now();
    dispatcher.start();

    let mut submitted = 0;
    let mut rejected = 0;
    for n in 1..=args.jobs {
        let jitter = if args.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=args.jitter_ms)
        } else {
            0
        };
        let work = MockWork {
            id: n.to_string(),
            sleep: Duration::from_millis(args.task_ms + jitter),
            fail: args.fail_every > 0 && n % args.fail_every == 0,
        };

        match dispatcher.submit(work).await {
            Ok(()) => submitted += 1,
            Err(err) => {
                tracing::warn!(job = n, error = %err, "job rejected");
                rejected += 1;
            }
        }
    }

    tracing::info!("waiting to stop");
    dispatcher.stop().await;
    let elapsed = started.elapsed();

    let stats = dispatcher.stats().await;
    let report = Report {
        submitted,
        rejected,
        elapsed_ms: elapsed.as_millis(),
        jobs_per_sec: stats.processed as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        stats,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "completed {} jobs ({} failed, {} panicked, {} rejected) in {:?} [{:.1} jobs/s]",
            report.stats.processed,
            report.stats.failed,
            report.stats.panicked,
            report.rejected,
            elapsed,
            report.jobs_per_sec,
        );
    }

    Ok(())
}
