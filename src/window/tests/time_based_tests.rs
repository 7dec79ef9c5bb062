// src/window/tests/time_based_tests.rs

use std::time::Duration;

use super::common::{failure, success};
use crate::clock::{Clock, ManualClock};
use crate::window::{OutcomeWindow, TimeBasedWindow};

#[test]
fn test_counts_calls_within_window() {
    let clock = ManualClock::new();
    let mut window = TimeBasedWindow::new(10, Duration::from_secs(1), clock.now());

    window.record(&failure(clock.now()));
    clock.advance(Duration::from_secs(3));
    window.record(&success(clock.now()));
    clock.advance(Duration::from_secs(3));
    window.record(&failure(clock.now()));

    let snapshot = window.snapshot(clock.now());
    assert_eq!(snapshot.total_calls, 3);
    assert_eq!(snapshot.failed_calls, 2);
}

#[test]
fn test_old_seconds_slide_out() {
    let clock = ManualClock::new();
    let mut window = TimeBasedWindow::new(5, Duration::from_secs(1), clock.now());

    window.record(&failure(clock.now()));
    window.record(&failure(clock.now()));

    clock.advance(Duration::from_secs(4));
    window.record(&success(clock.now()));
    assert_eq!(window.snapshot(clock.now()).total_calls, 3);

    // The failures were recorded in second 0; at second 5 they are outside the window
    clock.advance(Duration::from_secs(1));
    let snapshot = window.snapshot(clock.now());
    assert_eq!(snapshot.total_calls, 1);
    assert_eq!(snapshot.failed_calls, 0);

    clock.advance(Duration::from_secs(10));
    assert_eq!(window.snapshot(clock.now()).total_calls, 0);
}

#[test]
fn test_reused_slot_drops_stale_counts() {
    let clock = ManualClock::new();
    let mut window = TimeBasedWindow::new(2, Duration::from_secs(1), clock.now());

    window.record(&failure(clock.now()));

    // Second 2 maps onto the same slot as second 0
    clock.advance(Duration::from_secs(2));
    window.record(&success(clock.now()));

    let snapshot = window.snapshot(clock.now());
    assert_eq!(snapshot.total_calls, 1);
    assert_eq!(snapshot.failed_calls, 0);
}

#[test]
fn test_reset_empties_all_buckets() {
    let clock = ManualClock::new();
    let mut window = TimeBasedWindow::new(3, Duration::from_secs(1), clock.now());

    window.record(&failure(clock.now()));
    clock.advance(Duration::from_secs(1));
    window.record(&failure(clock.now()));

    window.reset();
    assert_eq!(window.snapshot(clock.now()).total_calls, 0);
}
