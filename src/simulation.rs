// src/simulation.rs

// Simulated dependencies for demos, the CLI and the bench
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::time;
use tracing::{debug, warn};

use crate::clock::saturating_millis;

/// Failures a simulated database can produce
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendError {
    #[error("connection timeout: unable to acquire connection from pool")]
    ConnectionTimeout,

    #[error("lock timeout: lock wait timeout exceeded")]
    LockTimeout,

    #[error("connection pool exhausted: maximum pool size reached")]
    PoolExhausted,

    #[error("query timeout: query execution time exceeded limit")]
    QueryTimeout,
}

/// A dependency that may fail or respond slowly
#[async_trait]
pub trait Backend: Send + Sync + Debug {
    /// Perform one round trip for the named operation
    async fn invoke(&self, operation: &str) -> Result<(), BackendError>;
}

/// How a [`FlakyBackend`] misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaultProfile {
    /// Chance in [0, 1] that a call fails
    pub failure_probability: f64,
    /// Chance in [0, 1] that a successful call is slow
    pub slow_probability: f64,
    #[serde(with = "millis")]
    pub latency_min: Duration,
    #[serde(with = "millis")]
    pub latency_max: Duration,
    /// Extra latency added to a slow call
    #[serde(with = "millis")]
    pub slow_latency: Duration,
}

impl Default for FaultProfile {
    fn default() -> Self {
        Self {
            failure_probability: 0.05,
            slow_probability: 0.02,
            latency_min: Duration::from_millis(50),
            latency_max: Duration::from_millis(200),
            slow_latency: Duration::from_secs(4),
        }
    }
}

impl FaultProfile {
    /// Always answers, immediately
    pub fn healthy() -> Self {
        Self {
            failure_probability: 0.0,
            slow_probability: 0.0,
            latency_min: Duration::ZERO,
            latency_max: Duration::ZERO,
            slow_latency: Duration::ZERO,
        }
    }

    /// Always fails, immediately
    pub fn outage() -> Self {
        Self {
            failure_probability: 1.0,
            ..Self::healthy()
        }
    }

    /// Always answers, after `latency`
    pub fn sluggish(latency: Duration) -> Self {
        Self {
            latency_min: latency,
            latency_max: latency,
            ..Self::healthy()
        }
    }
}

/// In-process stand-in for a database that fails at random
#[derive(Debug)]
pub struct FlakyBackend {
    profile: RwLock<FaultProfile>,
    calls: AtomicU64,
    failures: AtomicU64,
}

impl Default for FlakyBackend {
    fn default() -> Self {
        Self::new(FaultProfile::default())
    }
}

impl FlakyBackend {
    pub fn new(profile: FaultProfile) -> Self {
        Self {
            profile: RwLock::new(profile),
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn healthy() -> Self {
        Self::new(FaultProfile::healthy())
    }

    pub fn profile(&self) -> FaultProfile {
        *self.profile.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change behaviour for subsequent calls
    pub fn set_profile(&self, profile: FaultProfile) {
        debug!(?profile, "Fault profile changed");
        *self.profile.write().unwrap_or_else(PoisonError::into_inner) = profile;
    }

    /// Number of calls that reached the backend
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of calls that failed
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Roll the dice for one call
    fn plan(&self) -> (Duration, Option<BackendError>) {
        let profile = self.profile();
        let mut rng = rand::rng();

        let min = saturating_millis(profile.latency_min);
        let max = saturating_millis(profile.latency_max).max(min);
        let mut latency = Duration::from_millis(rng.random_range(min..=max));

        if rng.random_bool(probability(profile.failure_probability)) {
            let error = match rng.random_range(0.0..1.0) {
                roll if roll < 0.3 => BackendError::ConnectionTimeout,
                roll if roll < 0.6 => BackendError::LockTimeout,
                roll if roll < 0.8 => BackendError::PoolExhausted,
                _ => BackendError::QueryTimeout,
            };
            return (latency, Some(error));
        }

        if rng.random_bool(probability(profile.slow_probability)) {
            latency += profile.slow_latency;
        }
        (latency, None)
    }
}

#[async_trait]
impl Backend for FlakyBackend {
    async fn invoke(&self, operation: &str) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (latency, failure) = self.plan();

        if !latency.is_zero() {
            time::sleep(latency).await;
        }

        match failure {
            Some(error) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                warn!(operation, %error, "Simulated backend failure");
                Err(error)
            }
            None => Ok(()),
        }
    }
}

fn probability(p: f64) -> f64 {
    if p.is_finite() {
        p.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(crate::clock::saturating_millis(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
