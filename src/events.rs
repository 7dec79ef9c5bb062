// src/events.rs
//! Breaker events and the sinks that observe them.
//!
//! Sinks are notified after the breaker has released its lock and are never
//! consulted for correctness: a sink that drops events only loses visibility.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::breaker::BreakerState;
use crate::clock::saturating_millis;

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// The breaker changed state
    StateTransition {
        from: BreakerState,
        to: BreakerState,
    },
    /// A guarded call succeeded
    Success {
        #[serde(with = "millis")]
        elapsed: Duration,
        slow: bool,
    },
    /// A guarded call failed
    Error {
        #[serde(with = "millis")]
        elapsed: Duration,
        slow: bool,
        message: String,
    },
    /// A guarded call was dropped before it completed; counted as a failure
    Cancelled {
        #[serde(with = "millis")]
        elapsed: Duration,
    },
    /// A call was rejected without running
    NotPermitted { state: BreakerState },
    /// A call finished after the breaker moved on and was not counted
    LateOutcome { success: bool },
    /// The breaker was forced back to closed
    Reset,
}

/// A single notification from a breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerEvent {
    pub id: Uuid,
    pub breaker: String,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

impl BreakerEvent {
    pub fn new(breaker: &str, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            breaker: breaker.to_string(),
            at: Utc::now(),
            kind,
        }
    }
}

/// Receives breaker events; must not block
pub trait EventSink: Send + Sync + Debug {
    fn on_event(&self, event: &BreakerEvent);
}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&self, event: &BreakerEvent) {
        match &event.kind {
            EventKind::StateTransition { from, to } => {
                crate::breaker_transition!(event.breaker, from, to)
            }
            EventKind::Success { elapsed, slow } => {
                crate::guarded_call!(event.breaker, true, *elapsed, *slow)
            }
            EventKind::Error {
                elapsed,
                slow,
                message,
            } => warn!(
                breaker = %event.breaker,
                elapsed_ms = saturating_millis(*elapsed),
                slow = slow,
                error = %message,
                "Circuit breaker error call"
            ),
            EventKind::Cancelled { elapsed } => warn!(
                breaker = %event.breaker,
                elapsed_ms = saturating_millis(*elapsed),
                "Circuit breaker call cancelled before completion"
            ),
            EventKind::NotPermitted { state } => warn!(
                breaker = %event.breaker,
                state = %state,
                "Circuit breaker call not permitted"
            ),
            EventKind::LateOutcome { success } => debug!(
                breaker = %event.breaker,
                success = success,
                "Circuit breaker ignored late outcome"
            ),
            EventKind::Reset => info!(breaker = %event.breaker, "Circuit breaker reset"),
        }
    }
}

/// Forwards events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<BreakerEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BreakerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: &BreakerEvent) {
        // A closed receiver just means nobody is listening any more
        let _ = self.sender.send(event.clone());
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(crate::clock::saturating_millis(*duration))
    }
}
