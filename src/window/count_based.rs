// src/window/count_based.rs

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::window::{OutcomeRecord, OutcomeWindow, WindowSnapshot};

#[derive(Debug, Clone, Copy)]
struct Entry {
    failed: bool,
    slow: bool,
}

/// Window over the last `size` calls.
///
/// Keeps running totals so recording and snapshotting are O(1).
#[derive(Debug, Clone)]
pub struct CountBasedWindow {
    entries: VecDeque<Entry>,
    size: usize,
    slow_call_duration: Duration,
    totals: WindowSnapshot,
}

impl CountBasedWindow {
    pub fn new(size: usize, slow_call_duration: Duration) -> Self {
        let size = size.max(1);
        Self {
            entries: VecDeque::with_capacity(size),
            size,
            slow_call_duration,
            totals: WindowSnapshot::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.size
    }
}

impl OutcomeWindow for CountBasedWindow {
    fn record(&mut self, record: &OutcomeRecord) {
        if self.entries.len() == self.size {
            if let Some(evicted) = self.entries.pop_front() {
                self.totals.remove(evicted.failed, evicted.slow);
            }
        }

        let entry = Entry {
            failed: !record.success,
            slow: record.is_slow(self.slow_call_duration),
        };
        self.totals.add(entry.failed, entry.slow);
        self.entries.push_back(entry);
    }

    fn snapshot(&mut self, _now: Instant) -> WindowSnapshot {
        self.totals
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.totals = WindowSnapshot::default();
    }
}
