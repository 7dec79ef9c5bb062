// src/bin/breaker_cli.rs

use prettytable::{row, Table};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use circuit_gate::simulation::{Backend, BackendError, FaultProfile, FlakyBackend};
use circuit_gate::{
    Breaker, BreakerConfig, BreakerEvent, BreakerMetrics, ChannelSink, EventKind, GuardError,
    SlidingWindowType,
};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "breaker_cli",
    about = "A CLI for watching a circuit breaker react to a flaky dependency"
)]
struct Opt {
    /// Traffic pattern to simulate
    #[structopt(long, possible_values = &["steady", "outage", "custom"], default_value = "outage")]
    simulation: String,

    /// Failure rate (percent) that opens the breaker
    #[structopt(short, long, default_value = "50")]
    failure_rate: f64,

    /// Slow-call rate (percent) that opens the breaker
    #[structopt(long, default_value = "100")]
    slow_call_rate: f64,

    /// Calls slower than this many milliseconds count as slow
    #[structopt(long, default_value = "1000")]
    slow_call_ms: u64,

    /// Calls recorded before rates are evaluated
    #[structopt(short, long, default_value = "5")]
    minimum_calls: usize,

    /// Sliding window type
    #[structopt(long, possible_values = &["count_based", "time_based"], default_value = "count_based")]
    window_type: SlidingWindowType,

    /// Window size, in calls or seconds
    #[structopt(short, long, default_value = "10")]
    window_size: usize,

    /// Milliseconds to stay open before probing
    #[structopt(long, default_value = "2000")]
    wait_ms: u64,

    /// Probe calls permitted while half-open
    #[structopt(short, long, default_value = "2")]
    permits: usize,

    /// Number of requests to simulate
    #[structopt(short = "n", long, default_value = "60")]
    num_requests: usize,

    /// Time between requests in milliseconds
    #[structopt(short = "t", long, default_value = "100")]
    request_interval_ms: u64,

    /// Failure probability of the backend outside an outage
    #[structopt(long, default_value = "0.05")]
    failure_probability: f64,

    /// Request number at which the outage starts (outage mode)
    #[structopt(long, default_value = "10")]
    outage_start: usize,

    /// Number of requests the outage lasts (outage mode)
    #[structopt(long, default_value = "25")]
    outage_length: usize,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

impl Opt {
    fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_rate_threshold: self.failure_rate,
            slow_call_rate_threshold: self.slow_call_rate,
            slow_call_duration: Duration::from_millis(self.slow_call_ms),
            minimum_calls: self.minimum_calls,
            window_type: self.window_type,
            window_size: self.window_size,
            wait_duration: Duration::from_millis(self.wait_ms),
            half_open_permits: self.permits,
        }
    }

    fn normal_profile(&self) -> FaultProfile {
        FaultProfile {
            failure_probability: self.failure_probability,
            slow_probability: 0.0,
            latency_min: Duration::from_millis(5),
            latency_max: Duration::from_millis(30),
            slow_latency: Duration::ZERO,
        }
    }
}

/// Tally of what happened to each request
#[derive(Debug, Default)]
struct Tally {
    succeeded: usize,
    failed: usize,
    rejected: usize,
}

impl Tally {
    fn record<T>(&mut self, result: &Result<T, GuardError<BackendError>>) {
        match result {
            Ok(_) => self.succeeded += 1,
            Err(e) if e.is_open() => self.rejected += 1,
            Err(_) => self.failed += 1,
        }
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
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "breaker_cli={},circuit_gate={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let (sink, mut events) = ChannelSink::new();
    let breaker = Arc::new(
        Breaker::builder("cli", opt.breaker_config())
            .sink(Arc::new(sink))
            .build()?,
    );
    let backend = FlakyBackend::new(opt.normal_profile());

    // Print transitions as they happen
    let started = Instant::now();
    let printer = tokio::spawn(async move {
        let mut transitions = Vec::new();
        while let Some(event) = events.recv().await {
            if let EventKind::StateTransition { from, to } = event.kind {
                println!(
                    "[{:>7.2}s] {} -> {}",
                    started.elapsed().as_secs_f64(),
                    from,
                    to
                );
                transitions.push(event);
            }
        }
        transitions
    });

    info!(
        "Starting {} simulation against breaker {}",
        opt.simulation,
        breaker.id()
    );
    let tally = match opt.simulation.as_str() {
        "steady" => simulate_steady(&opt, &breaker, &backend).await,
        "outage" => simulate_outage(&opt, &breaker, &backend).await,
        "custom" => simulate_custom(&breaker, &backend, opt.normal_profile()).await?,
        other => {
            error!("Unknown simulation mode: {}", other);
            return Err("Unknown simulation mode".into());
        }
    };

    // Dropping the breaker closes the channel and ends the printer
    let metrics = breaker.metrics();
    drop(breaker);
    let transitions = printer.await?;

    print_summary(&tally, &metrics, &transitions, started.elapsed(), backend.calls());
    Ok(())
}

// Steady traffic against a backend with a constant failure probability
async fn simulate_steady(opt: &Opt, breaker: &Breaker, backend: &FlakyBackend) -> Tally {
    let mut tally = Tally::default();
    let interval = Duration::from_millis(opt.request_interval_ms);

    for i in 0..opt.num_requests {
        let request_time = Instant::now();
        let result = breaker.guard(|| backend.invoke("steady")).await;
        log_result(i, &result);
        tally.record(&result);

        let elapsed = request_time.elapsed();
        if elapsed < interval {
            time::sleep(interval - elapsed).await;
        }
    }

    tally
}

// Healthy traffic interrupted by a full outage, then recovery
async fn simulate_outage(opt: &Opt, breaker: &Breaker, backend: &FlakyBackend) -> Tally {
    let mut tally = Tally::default();
    let interval = Duration::from_millis(opt.request_interval_ms);
    let outage = opt.outage_start..opt.outage_start + opt.outage_length;

    for i in 0..opt.num_requests {
        if i == outage.start {
            warn!("Request {}: backend outage begins", i + 1);
            backend.set_profile(FaultProfile::outage());
        } else if i == outage.end {
            info!("Request {}: backend recovered", i + 1);
            backend.set_profile(opt.normal_profile());
        }

        let request_time = Instant::now();
        let result = breaker.guard(|| backend.invoke("outage")).await;
        log_result(i, &result);
        tally.record(&result);

        let elapsed = request_time.elapsed();
        if elapsed < interval {
            time::sleep(interval - elapsed).await;
        }
    }

    tally
}

// Interactive mode: drive the backend by hand
async fn simulate_custom(
    breaker: &Breaker,
    backend: &FlakyBackend,
    normal: FaultProfile,
) -> Result<Tally, Box<dyn std::error::Error>> {
    println!("\nCustom Simulation Mode");
    println!("----------------------");
    println!("Enter: make a request | fail: start outage | heal: end outage");
    println!("status: show metrics  | reset: close breaker | quit: exit");

    let mut tally = Tally::default();
    let mut input_buffer = String::new();
    let mut request = 0;

    loop {
        input_buffer.clear();
        if std::io::stdin().read_line(&mut input_buffer)? == 0 {
            break;
        }

        match input_buffer.trim() {
            "quit" | "exit" | "q" => break,
            "fail" => backend.set_profile(FaultProfile::outage()),
            "heal" => backend.set_profile(normal),
            "reset" => breaker.reset(),
            "status" => println!("{}", serde_json::to_string_pretty(&breaker.metrics())?),
            _ => {
                let result = breaker.guard(|| backend.invoke("custom")).await;
                match &result {
                    Ok(()) => println!("OK ({})", breaker.state()),
                    Err(e) => println!("{}", e),
                }
                tally.record(&result);
                request += 1;
            }
        }
    }

    info!(requests = request, "Custom simulation finished");
    Ok(tally)
}

fn log_result<T>(i: usize, result: &Result<T, GuardError<BackendError>>) {
    match result {
        Ok(_) => info!("Request {}: OK", i + 1),
        Err(GuardError::Open(open)) => warn!(
            "Request {}: REJECTED ({}, retry after {:?})",
            i + 1,
            open.state,
            open.retry_after
        ),
        Err(e) => warn!("Request {}: FAILED ({})", i + 1, e),
    }
}

fn print_summary(
    tally: &Tally,
    metrics: &BreakerMetrics,
    transitions: &[BreakerEvent],
    elapsed: Duration,
    backend_calls: u64,
) {
    let mut table = Table::new();
    table.add_row(row!["Metric", "Value"]);
    table.add_row(row!["Succeeded", tally.succeeded]);
    table.add_row(row!["Failed", tally.failed]);
    table.add_row(row!["Rejected (never attempted)", tally.rejected]);
    table.add_row(row!["Backend calls", backend_calls]);
    table.add_row(row!["State transitions", transitions.len()]);
    table.add_row(row!["Final state", metrics.state]);
    table.add_row(row!["Buffered calls", metrics.buffered_calls]);
    table.add_row(row![
        "Failure rate",
        metrics
            .failure_rate
            .map_or("n/a".to_string(), |rate| format!("{:.1}%", rate))
    ]);
    table.add_row(row!["Late records", metrics.late_records]);
    table.add_row(row!["Time elapsed", format!("{:?}", elapsed)]);

    println!("\nSimulation Results:");
    table.printstd();
}
