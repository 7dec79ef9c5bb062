// library entry
pub mod breaker;
pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod logging;
pub mod mailer;
pub mod registry;
pub mod simulation;
pub mod window;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use breaker::{Breaker, BreakerBuilder, BreakerMetrics, BreakerState, CallPermit, Transition};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BreakerConfig, RegistryConfig, SlidingWindowType, MAX_WINDOW_SIZE};
pub use error::{BreakerOpenError, CallFailure, ConfigError, GuardError, GuardResult, Result};
pub use events::{BreakerEvent, ChannelSink, EventKind, EventSink, TracingSink};
pub use logging::init as init_logging;
pub use registry::BreakerRegistry;
