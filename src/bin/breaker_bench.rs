// src/bin/breaker_bench.rs

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::{Barrier, Semaphore};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use circuit_gate::simulation::{Backend, FaultProfile, FlakyBackend};
use circuit_gate::{Breaker, BreakerConfig, GuardError};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "breaker_bench",
    about = "A stress test for a single circuit breaker under concurrency"
)]
struct Opt {
    /// Number of concurrent callers to simulate
    #[structopt(short = "u", long, default_value = "50")]
    num_callers: usize,

    /// Number of requests per caller
    #[structopt(short = "r", long, default_value = "200")]
    requests_per_caller: usize,

    /// Number of iterations to run
    #[structopt(short, long, default_value = "3")]
    iterations: usize,

    /// Maximum concurrency level
    #[structopt(short = "c", long, default_value = "100")]
    concurrency: usize,

    /// Failure probability of the backend
    #[structopt(short, long, default_value = "0.3")]
    failure_probability: f64,

    /// Maximum backend latency in milliseconds
    #[structopt(long, default_value = "2")]
    max_latency_ms: u64,

    /// Milliseconds to stay open before probing
    #[structopt(long, default_value = "50")]
    wait_ms: u64,

    /// Probe calls permitted while half-open
    #[structopt(short, long, default_value = "5")]
    permits: usize,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

/// Per-caller outcome counts
#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    succeeded: u64,
    failed: u64,
    rejected: u64,
}

impl Counts {
    fn total(&self) -> u64 {
        self.succeeded + self.failed + self.rejected
    }

    fn add(&mut self, other: Counts) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.rejected += other.rejected;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let opt = Opt::from_args();

    // Set up logging based on disable_logs flag
    let log_level = if opt.disable_logs {
        "error"
    } else {
        match opt.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "breaker_bench={},circuit_gate={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Ctrl-C stops the remaining requests; results so far are still reported
    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })?;

    let config = BreakerConfig {
        minimum_calls: 20,
        window_size: 100,
        wait_duration: Duration::from_millis(opt.wait_ms),
        half_open_permits: opt.permits,
        ..BreakerConfig::default()
    };
    let breaker = Arc::new(Breaker::new("bench", config)?);
    let backend = Arc::new(FlakyBackend::new(FaultProfile {
        failure_probability: opt.failure_probability,
        slow_probability: 0.0,
        latency_min: Duration::ZERO,
        latency_max: Duration::from_millis(opt.max_latency_ms),
        slow_latency: Duration::ZERO,
    }));

    run_benchmark(&opt, breaker, backend, stop).await
}

async fn run_benchmark(
    opt: &Opt,
    breaker: Arc<Breaker>,
    backend: Arc<FlakyBackend>,
    stop: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let name = format!("{} callers x {} requests", opt.num_callers, opt.requests_per_caller);
    println!("\nRunning benchmark: {}", name);
    println!("======================={}", "=".repeat(name.len()));

    let mut total_duration = Duration::from_secs(0);
    let mut total = Counts::default();
    let mut mismatches = 0;

    for iteration in 0..opt.iterations {
        if stop.load(Ordering::SeqCst) {
            warn!("Interrupted, skipping remaining iterations");
            break;
        }
        info!("Starting iteration {} of {}", iteration + 1, opt.iterations);

        breaker.reset();
        let before = breaker.metrics();
        let backend_before = backend.calls();

        let progress = ProgressBar::new((opt.num_callers * opt.requests_per_caller) as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({per_sec})")?
                .progress_chars("#>-"),
        );

        let start_time = Instant::now();

        // Create a barrier to start all tasks at once
        let barrier = Arc::new(Barrier::new(opt.num_callers));
        let concurrency_semaphore = Arc::new(Semaphore::new(opt.concurrency));
        let mut handles = Vec::with_capacity(opt.num_callers);

        for _ in 0..opt.num_callers {
            let breaker = Arc::clone(&breaker);
            let backend = Arc::clone(&backend);
            let barrier = Arc::clone(&barrier);
            let semaphore = Arc::clone(&concurrency_semaphore);
            let progress = progress.clone();
            let stop = Arc::clone(&stop);
            let requests = opt.requests_per_caller;

            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                let mut counts = Counts::default();

                for _ in 0..requests {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    // Limit concurrency
                    let Ok(_permit) = semaphore.acquire().await else {
                        break;
                    };

                    match breaker.guard(|| backend.invoke("bench")).await {
                        Ok(()) => counts.succeeded += 1,
                        Err(GuardError::Open(_)) => counts.rejected += 1,
                        Err(_) => counts.failed += 1,
                    }
                    progress.inc(1);
                }

                counts
            }));
        }

        // Wait for all tasks to complete
        let mut iteration_counts = Counts::default();
        for result in futures::future::join_all(handles).await {
            match result {
                Ok(counts) => iteration_counts.add(counts),
                Err(e) => error!("Caller task failed: {}", e),
            }
        }
        progress.finish_and_clear();

        let elapsed = start_time.elapsed();
        total_duration += elapsed;
        total.add(iteration_counts);

        // Every rejection is counted by the breaker and every attempt reached the backend
        let after = breaker.metrics();
        let rejected_by_breaker = after.not_permitted_calls - before.not_permitted_calls;
        let attempted = backend.calls() - backend_before;
        let consistent = rejected_by_breaker == iteration_counts.rejected
            && attempted == iteration_counts.succeeded + iteration_counts.failed;
        if !consistent {
            mismatches += 1;
            error!(
                rejected_by_breaker,
                rejected = iteration_counts.rejected,
                attempted,
                "Accounting mismatch"
            );
        }

        println!(
            "Iteration {}: {:?}, {} ok, {} failed, {} rejected, {:.2} req/sec, final state {}{}",
            iteration + 1,
            elapsed,
            iteration_counts.succeeded,
            iteration_counts.failed,
            iteration_counts.rejected,
            iteration_counts.total() as f64 / elapsed.as_secs_f64(),
            after.state,
            if consistent { "" } else { " (MISMATCH)" }
        );
    }

    if total.total() == 0 {
        println!("\nNo requests completed.");
        return Ok(());
    }

    let total_requests = total.total();
    println!("\nBenchmark Results for {}:", name);
    println!("  Total Requests:     {}", total_requests);
    println!(
        "  Succeeded:          {} ({:.1}%)",
        total.succeeded,
        100.0 * total.succeeded as f64 / total_requests as f64
    );
    println!(
        "  Failed:             {} ({:.1}%)",
        total.failed,
        100.0 * total.failed as f64 / total_requests as f64
    );
    println!(
        "  Rejected:           {} ({:.1}%)",
        total.rejected,
        100.0 * total.rejected as f64 / total_requests as f64
    );
    println!(
        "  Avg. Throughput:    {:.2} requests/second",
        total_requests as f64 / total_duration.as_secs_f64()
    );
    println!("  Late records:       {}", breaker.metrics().late_records);

    if mismatches > 0 {
        return Err(format!("{} iteration(s) failed the accounting check", mismatches).into());
    }
    Ok(())
}
