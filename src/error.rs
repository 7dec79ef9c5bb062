// for error definitions
use std::time::Duration;
use thiserror::Error;

use crate::breaker::BreakerState;

/// Returned when a breaker refuses to run the protected operation.
///
/// The operation was never attempted, so retrying before `retry_after`
/// has elapsed is pointless.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circuit breaker '{breaker}' is {state}; call not permitted")]
pub struct BreakerOpenError {
    /// Name of the breaker that rejected the call
    pub breaker: String,

    /// State the breaker was in when it rejected the call
    pub state: BreakerState,

    /// Remaining wait before the breaker will admit a probe, when known
    pub retry_after: Option<Duration>,
}

/// Why a fallback is being invoked
#[derive(Error, Debug)]
pub enum CallFailure<E> {
    /// The breaker rejected the call without running it
    #[error("{0}")]
    Rejected(BreakerOpenError),

    /// The operation ran and failed
    #[error("{0}")]
    Failed(E),
}

impl<E> CallFailure<E> {
    /// Whether the operation was actually attempted
    pub fn was_attempted(&self) -> bool {
        matches!(self, CallFailure::Failed(_))
    }

    /// The operation's own error, if it ran
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            CallFailure::Failed(err) => Some(err),
            CallFailure::Rejected(_) => None,
        }
    }
}

/// Error surfaced by the `guard*` entry points of a breaker
#[derive(Error, Debug)]
pub enum GuardError<E> {
    /// The call was rejected; the operation never ran
    #[error("{0}")]
    Open(#[from] BreakerOpenError),

    /// The operation ran and failed, and nothing absorbed the failure
    #[error("Operation failed: {0}")]
    Operation(E),

    /// The fallback itself failed
    #[error("Fallback failed: {error} (original cause: {cause})")]
    Fallback {
        /// What triggered the fallback
        cause: CallFailure<E>,
        /// What the fallback returned
        error: E,
    },
}

impl<E> GuardError<E> {
    /// True when the call was rejected without running the operation
    pub fn is_open(&self) -> bool {
        match self {
            GuardError::Open(_) => true,
            GuardError::Fallback { cause, .. } => !cause.was_attempted(),
            GuardError::Operation(_) => false,
        }
    }

    /// Whether the protected operation was attempted at all
    pub fn was_attempted(&self) -> bool {
        !self.is_open()
    }

    /// The protected operation's error, if it ran and failed
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            GuardError::Operation(err) => Some(err),
            GuardError::Fallback { cause, .. } => cause.operation_error(),
            GuardError::Open(_) => None,
        }
    }
}

impl<E> From<CallFailure<E>> for GuardError<E> {
    fn from(failure: CallFailure<E>) -> Self {
        match failure {
            CallFailure::Rejected(rejected) => GuardError::Open(rejected),
            CallFailure::Failed(err) => GuardError::Operation(err),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A percentage threshold outside (0, 100]
    #[error("Invalid {field}: {value} (expected a percentage in (0, 100])")]
    InvalidThreshold { field: &'static str, value: f64 },

    /// A count that must be at least one
    #[error("Invalid {field}: must be at least 1")]
    ZeroCount { field: &'static str },

    /// A size above the supported maximum
    #[error("Invalid {field}: must be at most {max}")]
    TooLarge { field: &'static str, max: usize },

    /// A duration that must be non-zero
    #[error("Invalid {field}: must be greater than zero")]
    ZeroDuration { field: &'static str },

    /// An environment variable that could not be parsed
    #[error("Invalid environment variable {var}: {message}")]
    Env { var: String, message: String },

    /// Configuration file could not be read
    #[error("Cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration document could not be parsed
    #[error("Configuration parse error: {0}")]
    Parse(String),
}

// implement conversions from serde_json::Error to ConfigError
impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Result of a guarded call
pub type GuardResult<T, E> = std::result::Result<T, GuardError<E>>;
