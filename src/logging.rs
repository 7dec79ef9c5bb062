// src/logging.rs

use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,circuit_gate=trace
///
/// Set LOG_FORMAT=json for one JSON object per line.
pub fn init() {
    init_with_default("info");
}

/// Like [`init`], with the filter used when RUST_LOG is not set
pub fn init_with_default(default_filter: &str) {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
        let json = json_requested(std::env::var("LOG_FORMAT").ok().as_deref());

        tracing_subscriber::registry()
            .with(filter)
            .with(json.then(|| {
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_target(true)
                    .with_thread_ids(true)
            }))
            .with((!json).then(|| {
                fmt::layer()
                    .with_target(true) // Include module path in logs
                    .with_thread_ids(true) // Useful for debugging concurrency issues
                    .with_line_number(true)
            }))
            .init();

        tracing::info!(json, "Logging initialized");
    });
}

fn json_requested(format: Option<&str>) -> bool {
    matches!(format, Some(f) if f.eq_ignore_ascii_case("json"))
}

/// Macro for logging a breaker state change
#[macro_export]
macro_rules! breaker_transition {
    ($breaker:expr, $from:expr, $to:expr) => {
        tracing::info!(
            breaker = %$breaker,
            from = %$from,
            to = %$to,
            "Circuit breaker state transition"
        )
    };
}

/// Macro for logging a completed guarded call with timing
#[macro_export]
macro_rules! guarded_call {
    ($breaker:expr, $success:expr, $elapsed:expr, $slow:expr) => {
        tracing::debug!(
            breaker = %$breaker,
            success = $success,
            elapsed_ms = $crate::clock::saturating_millis($elapsed),
            slow = $slow,
            "Guarded call finished"
        )
    };
}
