// src/window/time_based.rs

use std::time::{Duration, Instant};

use crate::window::{OutcomeRecord, OutcomeWindow, WindowSnapshot};

/// Counts for one second of the window
#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    /// Seconds since the window origin this bucket currently holds
    second: u64,
    counts: WindowSnapshot,
}

/// Time-based sliding window
///
/// Divides the last `size_secs` seconds into one-second buckets kept in a
/// ring. A bucket is reused once its second has slid out of the window, so
/// memory stays bounded regardless of call volume.
#[derive(Debug, Clone)]
pub struct TimeBasedWindow {
    buckets: Vec<Bucket>,
    size_secs: u64,
    slow_call_duration: Duration,
    origin: Instant,
}

impl TimeBasedWindow {
    pub fn new(size_secs: usize, slow_call_duration: Duration, origin: Instant) -> Self {
        let size_secs = size_secs.max(1);
        Self {
            buckets: vec![Bucket::default(); size_secs],
            size_secs: size_secs as u64,
            slow_call_duration,
            origin,
        }
    }

    /// Second index of an instant relative to the window origin
    fn second_of(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.origin).as_secs()
    }

    /// Whether a bucket's second is still inside the window ending at `current`
    fn is_live(&self, bucket: &Bucket, current: u64) -> bool {
        bucket.counts.total_calls > 0
            && bucket.second <= current
            && current - bucket.second < self.size_secs
    }
}

impl OutcomeWindow for TimeBasedWindow {
    fn record(&mut self, record: &OutcomeRecord) {
        let second = self.second_of(record.recorded_at);
        let slot = (second % self.size_secs) as usize;
        let slow = record.is_slow(self.slow_call_duration);

        let bucket = &mut self.buckets[slot];
        if bucket.second != second {
            // The slot still holds a second that has slid out of the window
            *bucket = Bucket {
                second,
                counts: WindowSnapshot::default(),
            };
        }
        bucket.counts.add(!record.success, slow);
    }

    fn snapshot(&mut self, now: Instant) -> WindowSnapshot {
        let current = self.second_of(now);
        let mut total = WindowSnapshot::default();

        for bucket in &self.buckets {
            if self.is_live(bucket, current) {
                total.total_calls += bucket.counts.total_calls;
                total.failed_calls += bucket.counts.failed_calls;
                total.slow_calls += bucket.counts.slow_calls;
                total.slow_failed_calls += bucket.counts.slow_failed_calls;
            }
        }

        total
    }

    fn reset(&mut self) {
        for bucket in &mut self.buckets {
            *bucket = Bucket::default();
        }
    }
}
