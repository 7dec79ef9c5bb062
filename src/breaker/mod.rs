// src/breaker/mod.rs
//! The circuit breaker gate.
//!
//! A [`Breaker`] wraps calls to a dependency that may fail. It keeps a
//! sliding window of recent outcomes and moves between three states:
//!
//! ```text
//! CLOSED    --[failure/slow rate >= threshold, calls >= minimum]--> OPEN
//! OPEN      --[wait duration elapsed]--> HALF_OPEN
//! HALF_OPEN --[probe rate >= threshold]--> OPEN
//! HALF_OPEN --[probe rate < threshold, all probes completed]--> CLOSED
//! ```
//!
//! Read paths usually pair a call with a fallback producing cached or
//! placeholder data ([`Breaker::guard_with_fallback`]). Write paths should
//! use [`Breaker::guard`] and let the error reach the caller, and idempotent
//! deletes can use [`Breaker::guard_idempotent`], which only turns a
//! recognised "already absent" failure into success.
//!
//! # Examples
//!
//! ```rust,no_run
//! use circuit_gate::{Breaker, BreakerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = Breaker::new("inventory", BreakerConfig::default())?;
//!
//! let stock = breaker
//!     .guard_with_fallback(
//!         || async { Ok::<u32, std::io::Error>(42) },
//!         |_reason| async { Ok(0) },
//!     )
//!     .await?;
//! assert_eq!(stock, 42);
//! # Ok(())
//! # }
//! ```

mod state;

#[cfg(test)]
mod tests;

pub use state::{BreakerState, Transition};

use serde::Serialize;
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::BreakerConfig;
use crate::error::{BreakerOpenError, CallFailure, GuardError, GuardResult, Result};
use crate::events::{BreakerEvent, EventKind, EventSink};
use crate::window::OutcomeRecord;
use state::{Admission, Permit, StateMachine};

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerMetrics {
    pub state: BreakerState,
    pub generation: u64,
    /// Failure rate in percent, `None` until enough calls are recorded
    pub failure_rate: Option<f64>,
    /// Slow-call rate in percent, `None` until enough calls are recorded
    pub slow_call_rate: Option<f64>,
    pub buffered_calls: usize,
    pub failed_calls: usize,
    pub slow_calls: usize,
    pub not_permitted_calls: u64,
    pub late_records: u64,
    pub remaining_probe_permits: usize,
}

/// How a guarded call ended
enum Completion {
    Success,
    Failure(String),
    Cancelled,
}

/// Builder for a [`Breaker`] with a custom clock or event sinks
#[derive(Debug)]
pub struct BreakerBuilder {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl BreakerBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sinks(mut self, sinks: impl IntoIterator<Item = Arc<dyn EventSink>>) -> Self {
        self.sinks.extend(sinks);
        self
    }

    /// Validate the configuration and build the breaker
    pub fn build(self) -> Result<Breaker> {
        self.config.validate()?;
        let now = self.clock.now();

        Ok(Breaker {
            id: Uuid::new_v4(),
            name: self.name,
            core: Mutex::new(StateMachine::new(self.config.clone(), now)),
            config: self.config,
            clock: self.clock,
            sinks: self.sinks,
            not_permitted: AtomicU64::new(0),
        })
    }
}

/// Circuit breaker gate
///
/// Construct once at wiring time and share the handle (`Arc<Breaker>`)
/// with every call site.
pub struct Breaker {
    id: Uuid,
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    core: Mutex<StateMachine>,
    sinks: Vec<Arc<dyn EventSink>>,
    not_permitted: AtomicU64,
}

impl fmt::Debug for Breaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breaker")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

impl Breaker {
    /// Create a breaker using the system clock and no event sinks
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Result<Self> {
        Self::builder(name, config).build()
    }

    pub fn builder(name: impl Into<String>, config: BreakerConfig) -> BreakerBuilder {
        BreakerBuilder {
            name: name.into(),
            config,
            clock: Arc::new(SystemClock),
            sinks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state of the circuit breaker
    pub fn state(&self) -> BreakerState {
        self.core().state()
    }

    /// Instant of the last transition to OPEN, if the breaker is open
    pub fn opened_at(&self) -> Option<Instant> {
        self.core().opened_at()
    }

    pub fn metrics(&self) -> BreakerMetrics {
        let now = self.clock.now();
        let mut core = self.core();
        let snapshot = core.snapshot(now);
        let enough = match core.state() {
            BreakerState::HalfOpen => snapshot.total_calls > 0,
            _ => snapshot.total_calls >= self.config.effective_minimum_calls(),
        };

        BreakerMetrics {
            state: core.state(),
            generation: core.generation(),
            failure_rate: enough.then(|| snapshot.failure_rate()),
            slow_call_rate: enough.then(|| snapshot.slow_call_rate()),
            buffered_calls: snapshot.total_calls,
            failed_calls: snapshot.failed_calls,
            slow_calls: snapshot.slow_calls,
            not_permitted_calls: self.not_permitted.load(Ordering::SeqCst),
            late_records: core.late_records(),
            remaining_probe_permits: core.remaining_probe_permits(),
        }
    }

    /// Force the breaker back to CLOSED with an empty window
    pub fn reset(&self) {
        let transition = self.core().reset();
        let mut events = Vec::with_capacity(2);
        if let Some(t) = transition {
            events.push(EventKind::StateTransition {
                from: t.from,
                to: t.to,
            });
        }
        events.push(EventKind::Reset);
        self.publish(events);
    }

    /// Ask for permission to run one call.
    ///
    /// The returned permit must be completed with
    /// [`CallPermit::record_success`] or [`CallPermit::record_failure`];
    /// dropping it unfinished records a cancelled call, which counts as a
    /// failure.
    pub fn acquire(&self) -> std::result::Result<CallPermit<'_>, BreakerOpenError> {
        let now = self.clock.now();
        let (admission, transition) = self.core().admit(now);

        let mut events = Vec::with_capacity(2);
        if let Some(t) = transition {
            events.push(EventKind::StateTransition {
                from: t.from,
                to: t.to,
            });
        }

        match admission {
            Admission::Allowed(permit) => {
                self.publish(events);
                Ok(CallPermit {
                    breaker: self,
                    permit,
                    finished: false,
                })
            }
            Admission::Rejected { state, retry_after } => {
                self.not_permitted.fetch_add(1, Ordering::SeqCst);
                events.push(EventKind::NotPermitted { state });
                self.publish(events);
                Err(BreakerOpenError {
                    breaker: self.name.clone(),
                    state,
                    retry_after,
                })
            }
        }
    }

    /// Run an async operation through the breaker, without a fallback.
    ///
    /// Use this for writes: a failed or rejected write surfaces as an error.
    pub async fn guard<T, E, F, Fut>(&self, operation: F) -> GuardResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let permit = self.acquire()?;
        permit.settle(operation().await).map_err(GuardError::Operation)
    }

    /// Run an async operation, falling back when it is rejected or fails.
    ///
    /// The fallback sees why it was invoked. If it fails too, the result is
    /// [`GuardError::Fallback`] carrying both causes.
    pub async fn guard_with_fallback<T, E, F, Fut, FB, FbFut>(
        &self,
        operation: F,
        fallback: FB,
    ) -> GuardResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        FB: FnOnce(&CallFailure<E>) -> FbFut,
        FbFut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let cause = match self.acquire() {
            Ok(permit) => match permit.settle(operation().await) {
                Ok(value) => return Ok(value),
                Err(err) => CallFailure::Failed(err),
            },
            Err(rejected) => CallFailure::Rejected(rejected),
        };

        debug!(breaker = %self.name, reason = %cause, "Invoking fallback");
        let outcome = fallback(&cause).await;
        outcome.map_err(|error| {
            warn!(breaker = %self.name, error = %error, "Fallback failed");
            GuardError::Fallback { cause, error }
        })
    }

    /// Run an idempotent write, treating "already absent" as success.
    ///
    /// `on_absent` is consulted only when the operation ran and failed; it
    /// returns the value to report when the failure means the target is
    /// already gone (for a delete, usually a not-found error). Such a
    /// failure is recorded as a success since the dependency answered.
    /// Rejections and every other failure propagate.
    pub async fn guard_idempotent<T, E, F, Fut, A>(
        &self,
        operation: F,
        on_absent: A,
    ) -> GuardResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        A: FnOnce(&E) -> Option<T>,
        E: Display,
    {
        let permit = self.acquire()?;
        match operation().await {
            Ok(value) => {
                permit.record_success();
                Ok(value)
            }
            Err(err) => match on_absent(&err) {
                Some(value) => {
                    debug!(breaker = %self.name, reason = %err, "Target already absent");
                    permit.record_success();
                    Ok(value)
                }
                None => {
                    permit.record_failure(&err);
                    Err(GuardError::Operation(err))
                }
            },
        }
    }

    /// Blocking counterpart of [`Breaker::guard`].
    ///
    /// A panic inside the operation is recorded as a failed call before it
    /// unwinds further.
    pub fn guard_blocking<T, E, F>(&self, operation: F) -> GuardResult<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: Display,
    {
        let permit = self.acquire()?;
        permit.settle(operation()).map_err(GuardError::Operation)
    }

    /// Blocking counterpart of [`Breaker::guard_with_fallback`]
    pub fn guard_blocking_with_fallback<T, E, F, FB>(
        &self,
        operation: F,
        fallback: FB,
    ) -> GuardResult<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        FB: FnOnce(&CallFailure<E>) -> std::result::Result<T, E>,
        E: Display,
    {
        let cause = match self.acquire() {
            Ok(permit) => match permit.settle(operation()) {
                Ok(value) => return Ok(value),
                Err(err) => CallFailure::Failed(err),
            },
            Err(rejected) => CallFailure::Rejected(rejected),
        };

        debug!(breaker = %self.name, reason = %cause, "Invoking fallback");
        fallback(&cause).map_err(|error| GuardError::Fallback { cause, error })
    }

    fn core(&self) -> MutexGuard<'_, StateMachine> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, permit: Permit, completion: Completion) {
        let now = self.clock.now();
        let latency = now.saturating_duration_since(permit.started_at);
        let success = matches!(completion, Completion::Success);
        let record = OutcomeRecord {
            recorded_at: now,
            success,
            latency,
        };

        let result = self.core().record(permit, record);

        let mut events = Vec::with_capacity(2);
        events.push(if !result.counted {
            EventKind::LateOutcome { success }
        } else {
            match completion {
                Completion::Success => EventKind::Success {
                    elapsed: latency,
                    slow: result.slow,
                },
                Completion::Failure(message) => EventKind::Error {
                    elapsed: latency,
                    slow: result.slow,
                    message,
                },
                Completion::Cancelled => EventKind::Cancelled { elapsed: latency },
            }
        });
        if let Some(t) = result.transition {
            events.push(EventKind::StateTransition {
                from: t.from,
                to: t.to,
            });
        }
        self.publish(events);
    }

    fn publish(&self, kinds: Vec<EventKind>) {
        if self.sinks.is_empty() {
            return;
        }
        for kind in kinds {
            let event = BreakerEvent::new(&self.name, kind);
            for sink in &self.sinks {
                sink.on_event(&event);
            }
        }
    }
}

/// Permission to run one call through a breaker
///
/// Dropping an unfinished permit records the call as cancelled.
#[derive(Debug)]
#[must_use = "an unfinished permit is recorded as a cancelled call"]
pub struct CallPermit<'a> {
    breaker: &'a Breaker,
    permit: Permit,
    finished: bool,
}

impl CallPermit<'_> {
    /// Whether this call is one of the half-open probes
    pub fn is_probe(&self) -> bool {
        self.permit.probe
    }

    pub fn record_success(mut self) {
        self.finished = true;
        self.breaker.complete(self.permit, Completion::Success);
    }

    pub fn record_failure(mut self, error: &dyn Display) {
        self.finished = true;
        self.breaker
            .complete(self.permit, Completion::Failure(error.to_string()));
    }

    /// Record the result and hand it back
    fn settle<T, E: Display>(
        self,
        result: std::result::Result<T, E>,
    ) -> std::result::Result<T, E> {
        match &result {
            Ok(_) => self.record_success(),
            Err(err) => self.record_failure(err),
        }
        result
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(breaker = %self.breaker.name, "Guarded call dropped before completion");
            self.breaker.complete(self.permit, Completion::Cancelled);
        }
    }
}
