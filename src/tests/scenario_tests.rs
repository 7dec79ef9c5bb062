// src/tests/scenario_tests.rs

use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

use crate::breaker::{Breaker, BreakerState};
use crate::clock::ManualClock;
use crate::config::{BreakerConfig, RegistryConfig};
use crate::directory::UserDirectory;
use crate::error::GuardError;
use crate::events::{ChannelSink, EventKind, TracingSink};
use crate::registry::BreakerRegistry;
use crate::simulation::{Backend, FaultProfile, FlakyBackend};

#[tokio::test]
async fn test_documented_scenario_through_registry() {
    let config = RegistryConfig::from_json_str(
        r#"{ "instances": { "database": {
            "minimum_calls": 4, "failure_rate_threshold": 50, "wait_duration": 1000
        } } }"#,
    )
    .unwrap();
    let clock = ManualClock::new();
    let (sink, mut events) = ChannelSink::new();
    let registry = BreakerRegistry::new(config)
        .unwrap()
        .with_clock(Arc::new(clock.clone()))
        .with_sink(Arc::new(sink));
    let breaker = registry.breaker("database").unwrap();
    let backend = FlakyBackend::healthy();

    for profile in [
        FaultProfile::outage(),
        FaultProfile::outage(),
        FaultProfile::healthy(),
        FaultProfile::healthy(),
    ] {
        backend.set_profile(profile);
        let _ = breaker.guard(|| backend.invoke("query")).await;
    }
    assert_eq!(breaker.state(), BreakerState::Open);

    clock.advance(Duration::from_millis(500));
    let rejected = breaker.guard(|| backend.invoke("query")).await;
    assert!(matches!(rejected, Err(GuardError::Open(_))));

    clock.advance(Duration::from_millis(600));
    assert!(breaker.guard(|| backend.invoke("query")).await.is_ok());
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert_eq!(backend.calls(), 5);

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EventKind::StateTransition { from, to } = event.kind {
            transitions.push((from, to));
        }
    }
    assert_eq!(
        transitions,
        vec![
            (BreakerState::Closed, BreakerState::Open),
            (BreakerState::Open, BreakerState::HalfOpen),
            (BreakerState::HalfOpen, BreakerState::Closed),
        ]
    );
}

#[tokio::test]
async fn test_slow_backend_trips_on_slow_call_rate() {
    let breaker = Arc::new(
        Breaker::new(
            "reports",
            BreakerConfig {
                slow_call_duration: Duration::from_millis(10),
                slow_call_rate_threshold: 50.0,
                minimum_calls: 3,
                ..BreakerConfig::default()
            },
        )
        .unwrap(),
    );
    let backend = FlakyBackend::new(FaultProfile::sluggish(Duration::from_millis(30)));

    for _ in 0..3 {
        // Slow calls still return their result
        assert!(breaker.guard(|| backend.invoke("report")).await.is_ok());
    }

    let metrics = breaker.metrics();
    assert_eq!(metrics.state, BreakerState::Open);
    assert_eq!(metrics.slow_calls, 3);
    assert_eq!(metrics.failed_calls, 0);
}

#[tokio::test]
#[traced_test]
async fn test_tracing_sink_reports_directory_outage() {
    let breaker = Arc::new(
        Breaker::builder(
            "database",
            BreakerConfig {
                minimum_calls: 2,
                ..BreakerConfig::default()
            },
        )
        .clock(Arc::new(ManualClock::new()))
        .sink(Arc::new(TracingSink))
        .build()
        .unwrap(),
    );
    let backend = Arc::new(FlakyBackend::new(FaultProfile::outage()));
    let directory = UserDirectory::new(breaker, backend);

    for _ in 0..3 {
        let _ = directory.find_all().await;
    }

    assert!(logs_contain("Circuit breaker error call"));
    assert!(logs_contain("to=OPEN"));
    assert!(logs_contain("Circuit breaker call not permitted"));
    assert!(logs_contain("Serving cached user list"));
}
