// src/window/mod.rs

pub mod count_based;
pub mod time_based;

#[cfg(test)]
mod tests;

pub use count_based::CountBasedWindow;
pub use time_based::TimeBasedWindow;

use serde::Serialize;
use std::fmt::Debug;
use std::time::{Duration, Instant};

use crate::config::{BreakerConfig, SlidingWindowType};

/// Outcome of a single guarded call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeRecord {
    /// When the call completed
    pub recorded_at: Instant,

    /// Whether the call succeeded
    pub success: bool,

    /// How long the call took
    pub latency: Duration,
}

impl OutcomeRecord {
    /// A call is slow when it took strictly longer than the threshold
    pub fn is_slow(&self, threshold: Duration) -> bool {
        self.latency > threshold
    }
}

/// Aggregate counts over the records currently in a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowSnapshot {
    pub total_calls: usize,
    pub failed_calls: usize,
    pub slow_calls: usize,
    pub slow_failed_calls: usize,
}

impl WindowSnapshot {
    /// Adds one record to the aggregate
    pub fn add(&mut self, failed: bool, slow: bool) {
        self.total_calls += 1;
        if failed {
            self.failed_calls += 1;
        }
        if slow {
            self.slow_calls += 1;
            if failed {
                self.slow_failed_calls += 1;
            }
        }
    }

    /// Removes one previously added record
    pub fn remove(&mut self, failed: bool, slow: bool) {
        self.total_calls = self.total_calls.saturating_sub(1);
        if failed {
            self.failed_calls = self.failed_calls.saturating_sub(1);
        }
        if slow {
            self.slow_calls = self.slow_calls.saturating_sub(1);
            if failed {
                self.slow_failed_calls = self.slow_failed_calls.saturating_sub(1);
            }
        }
    }

    /// Failure rate in percent; 0 for an empty window
    pub fn failure_rate(&self) -> f64 {
        percentage(self.failed_calls, self.total_calls)
    }

    /// Slow-call rate in percent; 0 for an empty window
    pub fn slow_call_rate(&self) -> f64 {
        percentage(self.slow_calls, self.total_calls)
    }

    /// Whether either rate reaches its configured threshold
    pub fn exceeds(&self, config: &BreakerConfig) -> bool {
        self.total_calls > 0
            && (self.failure_rate() >= config.failure_rate_threshold
                || self.slow_call_rate() >= config.slow_call_rate_threshold)
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

/// Bounded history of call outcomes
pub trait OutcomeWindow: Send + Debug {
    /// Adds a completed call to the window, evicting whatever falls out of it
    fn record(&mut self, record: &OutcomeRecord);

    /// Aggregates the records still inside the window as of `now`
    fn snapshot(&mut self, now: Instant) -> WindowSnapshot;

    /// Drops every record
    fn reset(&mut self);
}

/// Builds the window described by the configuration
pub fn for_config(config: &BreakerConfig, now: Instant) -> Box<dyn OutcomeWindow> {
    match config.window_type {
        SlidingWindowType::CountBased => Box::new(CountBasedWindow::new(
            config.window_size,
            config.slow_call_duration,
        )),
        SlidingWindowType::TimeBased => Box::new(TimeBasedWindow::new(
            config.window_size,
            config.slow_call_duration,
            now,
        )),
    }
}
