// src/window/tests/mod.rs

mod count_based_tests;
mod time_based_tests;

// Helpers shared by the window tests
pub(crate) mod common {
    use std::time::{Duration, Instant};

    use crate::window::OutcomeRecord;

    pub fn success(at: Instant) -> OutcomeRecord {
        OutcomeRecord {
            recorded_at: at,
            success: true,
            latency: Duration::from_millis(10),
        }
    }

    pub fn failure(at: Instant) -> OutcomeRecord {
        OutcomeRecord {
            recorded_at: at,
            success: false,
            latency: Duration::from_millis(10),
        }
    }

    pub fn slow(at: Instant, success: bool) -> OutcomeRecord {
        OutcomeRecord {
            recorded_at: at,
            success,
            latency: Duration::from_secs(5),
        }
    }
}
