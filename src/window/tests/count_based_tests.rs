// src/window/tests/count_based_tests.rs

use std::time::{Duration, Instant};

use super::common::{failure, slow, success};
use crate::window::{CountBasedWindow, OutcomeWindow};

#[test]
fn test_empty_window_has_zero_rates() {
    let mut window = CountBasedWindow::new(5, Duration::from_secs(1));
    let snapshot = window.snapshot(Instant::now());

    assert_eq!(snapshot.total_calls, 0);
    assert_eq!(snapshot.failure_rate(), 0.0);
    assert_eq!(snapshot.slow_call_rate(), 0.0);
}

#[test]
fn test_rates_over_recorded_calls() {
    let now = Instant::now();
    let mut window = CountBasedWindow::new(10, Duration::from_secs(1));

    window.record(&failure(now));
    window.record(&failure(now));
    window.record(&failure(now));
    window.record(&success(now));
    window.record(&success(now));

    let snapshot = window.snapshot(now);
    assert_eq!(snapshot.total_calls, 5);
    assert_eq!(snapshot.failed_calls, 3);
    assert_eq!(snapshot.failure_rate(), 60.0);
}

#[test]
fn test_oldest_records_are_evicted() {
    let now = Instant::now();
    let mut window = CountBasedWindow::new(3, Duration::from_secs(1));

    // Three failures fill the window
    for _ in 0..3 {
        window.record(&failure(now));
    }
    assert_eq!(window.snapshot(now).failure_rate(), 100.0);

    // Each success pushes one failure out
    window.record(&success(now));
    let snapshot = window.snapshot(now);
    assert_eq!(snapshot.total_calls, 3);
    assert_eq!(snapshot.failed_calls, 2);

    window.record(&success(now));
    window.record(&success(now));
    let snapshot = window.snapshot(now);
    assert_eq!(snapshot.total_calls, 3);
    assert_eq!(snapshot.failed_calls, 0);
}

#[test]
fn test_slow_calls_counted_independently_of_outcome() {
    let now = Instant::now();
    let mut window = CountBasedWindow::new(4, Duration::from_secs(2));

    window.record(&slow(now, true));
    window.record(&slow(now, false));
    window.record(&success(now));
    window.record(&success(now));

    let snapshot = window.snapshot(now);
    assert_eq!(snapshot.slow_calls, 2);
    assert_eq!(snapshot.slow_failed_calls, 1);
    assert_eq!(snapshot.failed_calls, 1);
    assert_eq!(snapshot.slow_call_rate(), 50.0);
}

#[test]
fn test_latency_equal_to_threshold_is_not_slow() {
    let now = Instant::now();
    let threshold = Duration::from_millis(10);
    let mut window = CountBasedWindow::new(2, threshold);

    // success() records exactly 10ms
    window.record(&success(now));
    assert_eq!(window.snapshot(now).slow_calls, 0);
}

#[test]
fn test_reset_clears_everything() {
    let now = Instant::now();
    let mut window = CountBasedWindow::new(3, Duration::from_secs(1));
    window.record(&failure(now));
    window.record(&success(now));

    window.reset();

    assert_eq!(window.snapshot(now).total_calls, 0);
    assert_eq!(window.capacity(), 3);
}
