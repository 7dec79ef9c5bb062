// src/registry.rs

// Named breakers shared across a service
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use tracing::info;

use crate::breaker::{Breaker, BreakerMetrics};
use crate::clock::{Clock, SystemClock};
use crate::config::{BreakerConfig, RegistryConfig};
use crate::error::Result;
use crate::events::EventSink;

/// Creates each named breaker once and hands out shared handles
#[derive(Debug)]
pub struct BreakerRegistry {
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
    sinks: Vec<Arc<dyn EventSink>>,
    breakers: RwLock<HashMap<String, Arc<Breaker>>>,
}

impl BreakerRegistry {
    /// Creates a registry, validating every configured breaker up front
    pub fn new(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock: Arc::new(SystemClock),
            sinks: Vec::new(),
            breakers: RwLock::new(HashMap::new()),
        })
    }

    /// Use a different clock for breakers created from now on
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach a sink to breakers created from now on
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The shared breaker for `name`, created on first use
    pub fn breaker(&self, name: &str) -> Result<Arc<Breaker>> {
        if let Some(existing) = self.read().get(name) {
            return Ok(Arc::clone(existing));
        }

        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // Another caller may have created it while we waited for the lock
        if let Some(existing) = breakers.get(name) {
            return Ok(Arc::clone(existing));
        }

        let config = self.config.config_for(name).clone();
        let breaker = Arc::new(self.build(name, config)?);
        info!(
            breaker = name,
            id = %breaker.id(),
            window_type = ?breaker.config().window_type,
            window_size = breaker.config().window_size,
            "Circuit breaker created"
        );
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        Ok(breaker)
    }

    /// The breaker for `name` if it has been created
    pub fn get(&self, name: &str) -> Option<Arc<Breaker>> {
        self.read().get(name).cloned()
    }

    /// Names of the breakers created so far, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Metrics of every created breaker, sorted by name
    pub fn metrics(&self) -> Vec<(String, BreakerMetrics)> {
        let mut all: Vec<(String, BreakerMetrics)> = self
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.metrics()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Force every created breaker back to CLOSED
    pub fn reset_all(&self) {
        for breaker in self.read().values() {
            breaker.reset();
        }
    }

    fn build(&self, name: &str, config: BreakerConfig) -> Result<Breaker> {
        Breaker::builder(name, config)
            .clock(Arc::clone(&self.clock))
            .sinks(self.sinks.iter().cloned())
            .build()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Breaker>>> {
        self.breakers.read().unwrap_or_else(PoisonError::into_inner)
    }
}
