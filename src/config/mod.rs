// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// How the sliding window bounds its history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlidingWindowType {
    /// Keeps the last `window_size` calls
    #[default]
    CountBased,
    /// Keeps calls completed during the last `window_size` seconds
    TimeBased,
}

impl FromStr for SlidingWindowType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "count_based" | "count" => Ok(SlidingWindowType::CountBased),
            "time_based" | "time" => Ok(SlidingWindowType::TimeBased),
            other => Err(ConfigError::Parse(format!(
                "unknown sliding window type '{}'",
                other
            ))),
        }
    }
}

/// Largest accepted `window_size`, in calls or seconds.
///
/// Windows preallocate their storage, so the size must stay bounded.
pub const MAX_WINDOW_SIZE: usize = 100_000;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failure rate (percent) at or above which the breaker opens
    #[serde(default = "default_rate_threshold")]
    pub failure_rate_threshold: f64,

    /// Slow-call rate (percent) at or above which the breaker opens
    #[serde(default = "default_rate_threshold")]
    pub slow_call_rate_threshold: f64,

    /// Calls slower than this are counted as slow
    #[serde(default = "default_slow_call_duration", with = "duration_serde")]
    pub slow_call_duration: Duration,

    /// Number of recorded calls required before rates are evaluated
    #[serde(default = "default_minimum_calls")]
    pub minimum_calls: usize,

    /// Count-based or time-based window
    #[serde(default)]
    pub window_type: SlidingWindowType,

    /// Window size, in calls or in seconds depending on `window_type`
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// How long the breaker stays open before admitting probes
    #[serde(default = "default_wait_duration", with = "duration_serde")]
    pub wait_duration: Duration,

    /// Number of probe calls permitted while half-open
    #[serde(default = "default_half_open_permits")]
    pub half_open_permits: usize,
}

fn default_rate_threshold() -> f64 {
    50.0
}

fn default_slow_call_duration() -> Duration {
    Duration::from_secs(2)
}

fn default_minimum_calls() -> usize {
    5
}

fn default_window_size() -> usize {
    10
}

fn default_wait_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_half_open_permits() -> usize {
    1
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: default_rate_threshold(),
            slow_call_rate_threshold: default_rate_threshold(),
            slow_call_duration: default_slow_call_duration(),
            minimum_calls: default_minimum_calls(),
            window_type: SlidingWindowType::default(),
            window_size: default_window_size(),
            wait_duration: default_wait_duration(),
            half_open_permits: default_half_open_permits(),
        }
    }
}

impl BreakerConfig {
    /// Checks every field; an invalid configuration is never patched up.
    pub fn validate(&self) -> Result<()> {
        check_threshold("failure_rate_threshold", self.failure_rate_threshold)?;
        check_threshold("slow_call_rate_threshold", self.slow_call_rate_threshold)?;

        if self.minimum_calls == 0 {
            return Err(ConfigError::ZeroCount {
                field: "minimum_calls",
            });
        }
        if self.window_size == 0 {
            return Err(ConfigError::ZeroCount {
                field: "window_size",
            });
        }
        if self.window_size > MAX_WINDOW_SIZE {
            return Err(ConfigError::TooLarge {
                field: "window_size",
                max: MAX_WINDOW_SIZE,
            });
        }
        if self.half_open_permits == 0 {
            return Err(ConfigError::ZeroCount {
                field: "half_open_permits",
            });
        }
        if self.wait_duration.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "wait_duration",
            });
        }
        if self.slow_call_duration.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "slow_call_duration",
            });
        }

        Ok(())
    }

    /// Minimum number of calls actually required before evaluating.
    ///
    /// A count-based window can never hold more than `window_size` calls,
    /// so the minimum is capped there.
    pub fn effective_minimum_calls(&self) -> usize {
        match self.window_type {
            SlidingWindowType::CountBased => self.minimum_calls.min(self.window_size),
            SlidingWindowType::TimeBased => self.minimum_calls,
        }
    }

    /// Load a configuration from environment variables, starting from defaults.
    ///
    /// Variables are named `{PREFIX}_FAILURE_RATE_THRESHOLD`,
    /// `{PREFIX}_SLOW_CALL_RATE_THRESHOLD`, `{PREFIX}_SLOW_CALL_DURATION_MS`,
    /// `{PREFIX}_MINIMUM_CALLS`, `{PREFIX}_WINDOW_TYPE`, `{PREFIX}_WINDOW_SIZE`,
    /// `{PREFIX}_WAIT_DURATION_MS` and `{PREFIX}_HALF_OPEN_PERMITS`.
    /// Unset variables keep their defaults; unparsable ones are an error.
    pub fn from_env(prefix: &str) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_value::<f64>(prefix, "FAILURE_RATE_THRESHOLD")? {
            config.failure_rate_threshold = v;
        }
        if let Some(v) = env_value::<f64>(prefix, "SLOW_CALL_RATE_THRESHOLD")? {
            config.slow_call_rate_threshold = v;
        }
        if let Some(v) = env_value::<u64>(prefix, "SLOW_CALL_DURATION_MS")? {
            config.slow_call_duration = Duration::from_millis(v);
        }
        if let Some(v) = env_value::<usize>(prefix, "MINIMUM_CALLS")? {
            config.minimum_calls = v;
        }
        if let Some(v) = env_value::<SlidingWindowType>(prefix, "WINDOW_TYPE")? {
            config.window_type = v;
        }
        if let Some(v) = env_value::<usize>(prefix, "WINDOW_SIZE")? {
            config.window_size = v;
        }
        if let Some(v) = env_value::<u64>(prefix, "WAIT_DURATION_MS")? {
            config.wait_duration = Duration::from_millis(v);
        }
        if let Some(v) = env_value::<usize>(prefix, "HALF_OPEN_PERMITS")? {
            config.half_open_permits = v;
        }

        config.validate()?;
        Ok(config)
    }
}

fn check_threshold(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 && value <= 100.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold { field, value })
    }
}

fn env_value<T>(prefix: &str, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let var = format!("{}_{}", prefix, name);
    match std::env::var(&var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Env {
                var,
                message: e.to_string(),
            }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::Env {
            var,
            message: e.to_string(),
        }),
    }
}

/// Configuration for a set of named breakers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Used for any breaker without its own entry
    #[serde(default)]
    pub defaults: BreakerConfig,

    /// Per-breaker overrides, keyed by breaker name
    #[serde(default)]
    pub instances: HashMap<String, BreakerConfig>,
}

impl RegistryConfig {
    /// Parse a registry configuration from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Validate the defaults and every instance
    pub fn validate(&self) -> Result<()> {
        self.defaults.validate()?;
        for config in self.instances.values() {
            config.validate()?;
        }
        Ok(())
    }

    /// The configuration a breaker with this name is built from
    pub fn config_for(&self, name: &str) -> &BreakerConfig {
        self.instances.get(name).unwrap_or(&self.defaults)
    }
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
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
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BreakerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.failure_rate_threshold, 50.0);
        assert_eq!(config.minimum_calls, 5);
        assert_eq!(config.window_size, 10);
        assert_eq!(config.wait_duration, Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_out_of_range_thresholds() {
        for bad in [0.0, -1.0, 100.5, f64::NAN] {
            let config = BreakerConfig {
                failure_rate_threshold: bad,
                ..BreakerConfig::default()
            };
            assert!(
                matches!(
                    config.validate(),
                    Err(ConfigError::InvalidThreshold {
                        field: "failure_rate_threshold",
                        ..
                    })
                ),
                "threshold {} should be rejected",
                bad
            );
        }

        let config = BreakerConfig {
            slow_call_rate_threshold: 101.0,
            ..BreakerConfig::default()
        };
        assert!(config.validate().is_err());

        // 100% is the inclusive upper bound
        let config = BreakerConfig {
            failure_rate_threshold: 100.0,
            ..BreakerConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_counts_and_durations() {
        let config = BreakerConfig {
            minimum_calls: 0,
            ..BreakerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroCount {
                field: "minimum_calls"
            })
        ));

        let config = BreakerConfig {
            wait_duration: Duration::ZERO,
            ..BreakerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration {
                field: "wait_duration"
            })
        ));

        let config = BreakerConfig {
            half_open_permits: 0,
            ..BreakerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_window() {
        for window_type in [SlidingWindowType::CountBased, SlidingWindowType::TimeBased] {
            let config = BreakerConfig {
                window_type,
                window_size: usize::MAX,
                ..BreakerConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::TooLarge {
                    field: "window_size",
                    max: MAX_WINDOW_SIZE
                })
            ));
        }

        let config = BreakerConfig {
            window_size: MAX_WINDOW_SIZE,
            ..BreakerConfig::default()
        };
        assert!(config.validate().is_ok());

        std::env::set_var("CFGTEST_HUGE_WINDOW_SIZE", usize::MAX.to_string());
        assert!(matches!(
            BreakerConfig::from_env("CFGTEST_HUGE"),
            Err(ConfigError::TooLarge { .. })
        ));

        let json = format!(r#"{{ "defaults": {{ "window_size": {} }} }}"#, usize::MAX);
        assert!(matches!(
            RegistryConfig::from_json_str(&json),
            Err(ConfigError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_huge_durations_serialize_saturated() {
        let config = BreakerConfig {
            wait_duration: Duration::MAX,
            ..BreakerConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["wait_duration"], u64::MAX);
        assert_eq!(json["slow_call_duration"], 2000);
    }

    #[test]
    fn test_effective_minimum_is_capped_for_count_window() {
        let config = BreakerConfig {
            minimum_calls: 20,
            window_size: 10,
            ..BreakerConfig::default()
        };
        assert_eq!(config.effective_minimum_calls(), 10);

        let config = BreakerConfig {
            window_type: SlidingWindowType::TimeBased,
            ..config
        };
        assert_eq!(config.effective_minimum_calls(), 20);
    }

    #[test]
    fn test_registry_from_json_with_partial_instances() {
        let json = r#"{
            "defaults": { "wait_duration": 5000 },
            "instances": {
                "database": { "minimum_calls": 3, "window_type": "TIME_BASED", "window_size": 60 },
                "emailService": { "failure_rate_threshold": 25.0 }
            }
        }"#;

        let config = RegistryConfig::from_json_str(json).unwrap();
        assert_eq!(config.defaults.wait_duration, Duration::from_secs(5));

        let database = config.config_for("database");
        assert_eq!(database.minimum_calls, 3);
        assert_eq!(database.window_type, SlidingWindowType::TimeBased);
        // unspecified instance fields take the built-in defaults
        assert_eq!(database.wait_duration, Duration::from_secs(30));

        assert_eq!(config.config_for("emailService").failure_rate_threshold, 25.0);
        assert_eq!(config.config_for("unknown"), &config.defaults);
    }

    #[test]
    fn test_registry_rejects_invalid_instance() {
        let json = r#"{ "instances": { "bad": { "minimum_calls": 0 } } }"#;
        assert!(matches!(
            RegistryConfig::from_json_str(json),
            Err(ConfigError::ZeroCount { .. })
        ));

        assert!(matches!(
            RegistryConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_env_reads_prefixed_variables() {
        std::env::set_var("CFGTEST_OK_FAILURE_RATE_THRESHOLD", "75");
        std::env::set_var("CFGTEST_OK_WAIT_DURATION_MS", "1500");
        std::env::set_var("CFGTEST_OK_WINDOW_TYPE", "time_based");

        let config = BreakerConfig::from_env("CFGTEST_OK").unwrap();
        assert_eq!(config.failure_rate_threshold, 75.0);
        assert_eq!(config.wait_duration, Duration::from_millis(1500));
        assert_eq!(config.window_type, SlidingWindowType::TimeBased);
        assert_eq!(config.minimum_calls, 5);

        std::env::set_var("CFGTEST_BAD_MINIMUM_CALLS", "many");
        assert!(matches!(
            BreakerConfig::from_env("CFGTEST_BAD"),
            Err(ConfigError::Env { .. })
        ));
    }
}
