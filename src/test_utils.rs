// src/test_utils.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

use crate::breaker::{Breaker, BreakerState};
use crate::clock::ManualClock;
use crate::config::BreakerConfig;
use crate::events::{BreakerEvent, EventKind, EventSink};

/// Error produced by test operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TestError {
    #[error("dependency failed: {0}")]
    Failed(String),

    #[error("not found")]
    NotFound,
}

/// Sink that keeps every event for later inspection
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<BreakerEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<BreakerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn transitions(&self) -> Vec<(BreakerState, BreakerState)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event.kind {
                EventKind::StateTransition { from, to } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&EventKind) -> bool) -> usize {
        self.events().iter().filter(|e| matches(&e.kind)).count()
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: &BreakerEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Stub dependency that counts how often it is invoked
#[derive(Debug, Default)]
pub struct CountingOperation {
    calls: AtomicUsize,
}

impl CountingOperation {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn succeed(&self) -> Result<u32, TestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(42)
    }

    pub async fn fail(&self) -> Result<u32, TestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TestError::Failed("boom".to_string()))
    }

    pub fn succeed_blocking(&self) -> Result<u32, TestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(42)
    }

    pub fn fail_blocking(&self) -> Result<u32, TestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TestError::Failed("boom".to_string()))
    }
}

/// Everything a breaker test needs: the breaker, its clock and its events
pub struct Harness {
    pub breaker: Arc<Breaker>,
    pub clock: ManualClock,
    pub sink: Arc<RecordingSink>,
    pub operation: CountingOperation,
}

impl Harness {
    pub fn new(config: BreakerConfig) -> Self {
        let clock = ManualClock::new();
        let sink = Arc::new(RecordingSink::default());
        let breaker = Breaker::builder("test", config)
            .clock(Arc::new(clock.clone()))
            .sink(sink.clone())
            .build()
            .expect("test config must be valid");

        Self {
            breaker: Arc::new(breaker),
            clock,
            sink,
            operation: CountingOperation::default(),
        }
    }

    pub async fn succeed(&self) -> bool {
        self.breaker.guard(|| self.operation.succeed()).await.is_ok()
    }

    pub async fn fail(&self) -> bool {
        self.breaker.guard(|| self.operation.fail()).await.is_ok()
    }

    /// Drive the breaker open with failures
    pub async fn trip(&self) {
        for _ in 0..self.breaker.config().effective_minimum_calls() {
            self.fail().await;
        }
        assert_eq!(self.breaker.state(), BreakerState::Open);
    }

    pub fn advance(&self, duration: Duration) {
        self.clock.advance(duration);
    }
}

/// Small-window configuration used across the tests
pub fn quick_config() -> BreakerConfig {
    BreakerConfig {
        failure_rate_threshold: 50.0,
        slow_call_rate_threshold: 100.0,
        slow_call_duration: Duration::from_secs(1),
        minimum_calls: 4,
        window_size: 10,
        wait_duration: Duration::from_millis(1000),
        half_open_permits: 1,
        ..BreakerConfig::default()
    }
}
