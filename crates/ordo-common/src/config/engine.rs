//! Engine configuration.
//!
//! Durations are stored as integer milliseconds so the structure maps
//! directly onto a TOML table; use the `Duration` accessors in code.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{OrdoError, OrdoResult};

/// Timing and retry configuration for transactions and the detector.
///
/// # Example
///
/// ```rust
/// use ordo_common::config::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.max_attempts, 3);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempts per transaction before it is marked failed.
    /// Default: 3
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Bound on a single low-level resource lock acquisition.
    /// Default: 100 ms
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Interval between acquisition attempts while waiting.
    /// Default: 100 ms
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wait budget of an older transaction blocked on a younger holder.
    /// Default: 3000 ms
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,

    /// Period of the deadlock detector.
    /// Default: 1000 ms
    #[serde(default = "default_detector_interval_ms")]
    pub detector_interval_ms: u64,

    /// Lower bound of the randomized restart backoff.
    /// Default: 500 ms
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,

    /// Upper bound of the randomized restart backoff.
    /// Default: 1500 ms
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_lock_timeout_ms() -> u64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_wait_ms() -> u64 {
    3000
}

fn default_detector_interval_ms() -> u64 {
    1000
}

fn default_backoff_min_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    1500
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            lock_timeout_ms: default_lock_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_ms: default_max_wait_ms(),
            detector_interval_ms: default_detector_interval_ms(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with short timings for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_attempts: 3,
            lock_timeout_ms: 10,
            poll_interval_ms: 5,
            max_wait_ms: 1000,
            detector_interval_ms: 20,
            backoff_min_ms: 1,
            backoff_max_ms: 5,
        }
    }

    /// Creates a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> OrdoResult<()> {
        if self.max_attempts == 0 {
            return Err(OrdoError::invalid_config("max_attempts must be at least 1"));
        }
        if self.lock_timeout_ms == 0 {
            return Err(OrdoError::invalid_config("lock_timeout_ms must be non-zero"));
        }
        if self.poll_interval_ms == 0 {
            return Err(OrdoError::invalid_config("poll_interval_ms must be non-zero"));
        }
        if self.detector_interval_ms == 0 {
            return Err(OrdoError::invalid_config(
                "detector_interval_ms must be non-zero",
            ));
        }
        if self.backoff_min_ms > self.backoff_max_ms {
            return Err(OrdoError::invalid_config(
                "backoff_min_ms must not exceed backoff_max_ms",
            ));
        }
        Ok(())
    }

    /// Bound on a single low-level lock acquisition.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Interval between polls while waiting.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Total wait budget.
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Detector period.
    #[must_use]
    pub fn detector_interval(&self) -> Duration {
        Duration::from_millis(self.detector_interval_ms)
    }

    /// Restart backoff range, in milliseconds (inclusive).
    #[must_use]
    pub fn backoff_range_ms(&self) -> (u64, u64) {
        (self.backoff_min_ms, self.backoff_max_ms)
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempt budget.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Sets the low-level lock timeout.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout_ms = duration_ms(timeout);
        self
    }

    /// Sets the wait polling interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = duration_ms(interval);
        self
    }

    /// Sets the wait budget.
    #[must_use]
    pub fn max_wait(mut self, wait: Duration) -> Self {
        self.config.max_wait_ms = duration_ms(wait);
        self
    }

    /// Sets the detector period.
    #[must_use]
    pub fn detector_interval(mut self, interval: Duration) -> Self {
        self.config.detector_interval_ms = duration_ms(interval);
        self
    }

    /// Sets the restart backoff range.
    #[must_use]
    pub fn backoff(mut self, min: Duration, max: Duration) -> Self {
        self.config.backoff_min_ms = duration_ms(min);
        self.config.backoff_max_ms = duration_ms(max);
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> OrdoResult<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
