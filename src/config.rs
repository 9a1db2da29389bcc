//! Pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a resource pool.
///
/// Set once at construction and never mutated afterwards. Validated by
/// [`PoolConfig::validate`] before the pool starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool name used in errors and log output.
    pub name: String,
    /// Minimum number of resources kept alive (warm-start target).
    pub min_size: usize,
    /// Maximum number of resources, idle and in-use combined.
    pub max_size: usize,
    /// How long a queued `acquire` waits before timing out.
    pub acquire_timeout: Duration,
    /// Idle resources older than this are evicted (down to `min_size`).
    pub idle_timeout: Duration,
    /// Maximum number of queued waiters before `acquire` fails fast.
    pub max_queue_size: usize,
    /// Validate resources handed out by `acquire`.
    pub validate_on_acquire: bool,
    /// Validate resources returned by `release`.
    pub validate_on_release: bool,
    /// Record rolling acquisition/creation latency statistics.
    pub enable_metrics: bool,
    /// Grow toward `max_size` under sustained high utilization.
    pub auto_resize: bool,
    /// Utilization fraction (0..=1) above which auto-resize grows the pool.
    pub resize_threshold: f64,
    /// Creation attempts before `acquire` fails with a creation error.
    pub max_retries: u32,
    /// Base delay between creation retries (linear backoff: attempt n
    /// waits n times this).
    pub retry_delay: Duration,
    /// Interval of the background health/resize loop.
    pub health_check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            min_size: 0,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_queue_size: 100,
            validate_on_acquire: true,
            validate_on_release: false,
            enable_metrics: true,
            auto_resize: false,
            resize_threshold: 0.8,
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Create a config with the given name and defaults for everything else.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::configuration("max_size must be greater than 0"));
        }
        if self.min_size > self.max_size {
            return Err(Error::configuration(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(Error::configuration(
                "acquire_timeout must be greater than zero",
            ));
        }
        if !(0.0..=1.0).contains(&self.resize_threshold) {
            return Err(Error::configuration(
                "resize_threshold must be within 0.0..=1.0",
            ));
        }
        if self.max_retries == 0 {
            return Err(Error::configuration("max_retries must be at least 1"));
        }
        if self.health_check_interval.is_zero() {
            return Err(Error::configuration(
                "health_check_interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_max_size() {
        let config = PoolConfig {
            max_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_min_above_max() {
        let config = PoolConfig {
            min_size: 11,
            max_size: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_resize_threshold() {
        let config = PoolConfig {
            resize_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn named_sets_name() {
        let config = PoolConfig::named("db-main");
        assert_eq!(config.name, "db-main");
        assert!(config.validate().is_ok());
    }
}
