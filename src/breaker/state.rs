// src/breaker/state.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::BreakerConfig;
use crate::window::{self, OutcomeRecord, OutcomeWindow, WindowSnapshot};

/// The state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are failing and not being sent
    Open,
    /// Circuit is partially open, allowing a limited number of requests to test recovery
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(name)
    }
}

/// A state change decided by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BreakerState,
    pub to: BreakerState,
}

/// Admission ticket for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Permit {
    /// Generation the call was admitted under
    pub generation: u64,
    /// Whether the call holds one of the half-open probe permits
    pub probe: bool,
    pub started_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Allowed(Permit),
    Rejected {
        state: BreakerState,
        retry_after: Option<Duration>,
    },
}

/// What happened to a recorded outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordResult {
    pub slow: bool,
    /// False when the record was discarded as late
    pub counted: bool,
    pub transition: Option<Transition>,
}

/// The breaker's mutable core.
///
/// Every method runs inside the breaker's critical section, so a transition
/// is decided by exactly one caller.
#[derive(Debug)]
pub(crate) struct StateMachine {
    config: BreakerConfig,
    state: BreakerState,
    window: Box<dyn OutcomeWindow>,
    /// Results of the probes admitted in the current half-open period
    probes: WindowSnapshot,
    probe_permits: usize,
    opened_at: Option<Instant>,
    generation: u64,
    late_records: u64,
}

impl StateMachine {
    pub fn new(config: BreakerConfig, now: Instant) -> Self {
        let window = window::for_config(&config, now);
        Self {
            config,
            state: BreakerState::Closed,
            window,
            probes: WindowSnapshot::default(),
            probe_permits: 0,
            opened_at: None,
            generation: 0,
            late_records: 0,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    pub fn remaining_probe_permits(&self) -> usize {
        self.probe_permits
    }

    pub fn late_records(&self) -> u64 {
        self.late_records
    }

    /// Aggregate of the current window, or of the probes while half-open
    pub fn snapshot(&mut self, now: Instant) -> WindowSnapshot {
        match self.state {
            BreakerState::HalfOpen => self.probes,
            _ => self.window.snapshot(now),
        }
    }

    /// Decide whether a call may run.
    ///
    /// May move OPEN to HALF_OPEN when the wait duration has elapsed; the
    /// transition is returned alongside the admission.
    pub fn admit(&mut self, now: Instant) -> (Admission, Option<Transition>) {
        match self.state {
            BreakerState::Closed => (Admission::Allowed(self.permit(false, now)), None),
            BreakerState::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);

                if elapsed < self.config.wait_duration {
                    let rejection = Admission::Rejected {
                        state: BreakerState::Open,
                        retry_after: Some(self.config.wait_duration - elapsed),
                    };
                    return (rejection, None);
                }

                let transition = self.to_half_open();
                (self.take_probe(now), Some(transition))
            }
            BreakerState::HalfOpen => (self.take_probe(now), None),
        }
    }

    /// Record a completed call admitted with `permit`.
    ///
    /// A record whose permit belongs to an older generation still lands in
    /// the window while the breaker is CLOSED, since the window covers
    /// recent traffic regardless of when a call started. While OPEN or
    /// HALF_OPEN it is discarded and counted in `late_records`: a half-open
    /// period is judged only by its own probes, so a call admitted before
    /// the breaker opened can neither answer nor fail a probe.
    pub fn record(&mut self, permit: Permit, record: OutcomeRecord) -> RecordResult {
        let slow = record.is_slow(self.config.slow_call_duration);
        let mut result = RecordResult {
            slow,
            counted: true,
            transition: None,
        };

        if permit.generation != self.generation {
            // A call that outlived the generation it was admitted under.
            // Only a closed breaker has a window for it; it never answers a probe.
            if self.state != BreakerState::Closed {
                self.late_records += 1;
                result.counted = false;
                debug!(
                    permit_generation = permit.generation,
                    generation = self.generation,
                    state = %self.state,
                    "Discarding late outcome"
                );
                return result;
            }
        }

        match self.state {
            BreakerState::Closed => {
                self.window.record(&record);
                result.transition = self.evaluate_closed(record.recorded_at);
            }
            BreakerState::HalfOpen if permit.probe => {
                self.probes.add(!record.success, slow);
                if self.probes.total_calls >= self.config.half_open_permits {
                    result.transition = Some(self.evaluate_probes(record.recorded_at));
                }
            }
            _ => {
                // Same-generation records cannot reach an open breaker
                self.late_records += 1;
                result.counted = false;
            }
        }

        result
    }

    /// Force the breaker closed with an empty window
    pub fn reset(&mut self) -> Option<Transition> {
        let from = self.state;
        self.to_closed();
        (from != BreakerState::Closed).then_some(Transition {
            from,
            to: BreakerState::Closed,
        })
    }

    fn permit(&self, probe: bool, now: Instant) -> Permit {
        Permit {
            generation: self.generation,
            probe,
            started_at: now,
        }
    }

    fn take_probe(&mut self, now: Instant) -> Admission {
        if self.probe_permits == 0 {
            return Admission::Rejected {
                state: BreakerState::HalfOpen,
                retry_after: None,
            };
        }
        self.probe_permits -= 1;
        Admission::Allowed(self.permit(true, now))
    }

    fn evaluate_closed(&mut self, now: Instant) -> Option<Transition> {
        let snapshot = self.window.snapshot(now);
        if snapshot.total_calls < self.config.effective_minimum_calls() {
            return None;
        }
        if snapshot.exceeds(&self.config) {
            debug!(
                failure_rate = snapshot.failure_rate(),
                slow_call_rate = snapshot.slow_call_rate(),
                calls = snapshot.total_calls,
                "Window crossed threshold"
            );
            return Some(self.to_open(now));
        }
        None
    }

    fn evaluate_probes(&mut self, now: Instant) -> Transition {
        let probes = self.probes;
        debug!(
            probes = probes.total_calls,
            failure_rate = probes.failure_rate(),
            slow_call_rate = probes.slow_call_rate(),
            "All probes completed"
        );
        if probes.exceeds(&self.config) {
            self.to_open(now)
        } else {
            self.to_closed()
        }
    }

    fn to_open(&mut self, now: Instant) -> Transition {
        let from = self.state;
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.probe_permits = 0;
        self.probes = WindowSnapshot::default();
        self.generation += 1;
        Transition {
            from,
            to: BreakerState::Open,
        }
    }

    fn to_half_open(&mut self) -> Transition {
        let from = self.state;
        self.state = BreakerState::HalfOpen;
        self.probe_permits = self.config.half_open_permits;
        self.probes = WindowSnapshot::default();
        self.window.reset();
        self.generation += 1;
        Transition {
            from,
            to: BreakerState::HalfOpen,
        }
    }

    fn to_closed(&mut self) -> Transition {
        let from = self.state;
        self.state = BreakerState::Closed;
        self.opened_at = None;
        self.probe_permits = 0;
        self.probes = WindowSnapshot::default();
        self.window.reset();
        self.generation += 1;
        Transition {
            from,
            to: BreakerState::Closed,
        }
    }
}
