//! Execution manager configuration.

use crate::executor::ExecutorError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sizing and timing of the manager's worker pool.
///
/// Deserializes from any serde source; missing fields take their defaults.
///
/// # Example
///
/// ```rust
/// use protocol_sm::executor::ExecutorConfig;
/// use std::time::Duration;
///
/// let config = ExecutorConfig::builder()
///     .min_threads(1)
///     .max_threads(4)
///     .runner_idle_time(Duration::from_millis(200))
///     .build()
///     .unwrap();
/// assert_eq!(config.max_threads, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Async worker threads. They drive timers and hand free workers to
    /// queued tasks; submitted tasks themselves run on the bounded pool.
    pub min_threads: usize,

    /// Upper bound on tasks in flight. `submit` blocks beyond this.
    pub max_threads: usize,

    /// How long a surplus worker thread lingers without work.
    pub keep_alive: Duration,

    /// How long a runner keeps its worker after draining its queue before
    /// releasing it.
    pub runner_idle_time: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_threads: 2,
            max_threads: 20,
            keep_alive: Duration::from_secs(60),
            runner_idle_time: Duration::from_secs(1),
        }
    }
}

impl ExecutorConfig {
    pub fn builder() -> ExecutorConfigBuilder {
        ExecutorConfigBuilder::new()
    }

    /// A small configuration for tests: one to four threads, short idle time.
    pub fn minimal() -> Self {
        Self {
            min_threads: 1,
            max_threads: 4,
            keep_alive: Duration::from_secs(5),
            runner_idle_time: Duration::from_millis(50),
        }
    }

    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.min_threads == 0 {
            return Err(ExecutorError::InvalidConfig(
                "min_threads must be at least 1".to_string(),
            ));
        }
        if self.max_threads < self.min_threads {
            return Err(ExecutorError::InvalidConfig(format!(
                "max_threads ({}) must not be less than min_threads ({})",
                self.max_threads, self.min_threads
            )));
        }
        Ok(())
    }
}

/// Builder for [`ExecutorConfig`].
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfigBuilder {
    config: ExecutorConfig,
}

impl ExecutorConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_threads(mut self, count: usize) -> Self {
        self.config.min_threads = count;
        self
    }

    pub fn max_threads(mut self, count: usize) -> Self {
        self.config.max_threads = count;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    pub fn runner_idle_time(mut self, idle: Duration) -> Self {
        self.config.runner_idle_time = idle;
        self
    }

    /// Build the configuration, validating it first.
    pub fn build(self) -> Result<ExecutorConfig, ExecutorError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
