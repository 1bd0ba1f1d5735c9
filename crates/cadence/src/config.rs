//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SchedulerError;

// Validation constants
const MAX_POOL_SIZE: usize = 1024;
const MAX_NAME_LENGTH: usize = 64;
const MIN_STACK_SIZE: usize = 64 * 1024;
const MIN_MONITOR_INTERVAL_MS: u64 = 10;

/// Default number of worker threads.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Default worker name pattern.
pub const DEFAULT_THREAD_NAME: &str = "cadence-worker-{}";

/// Default time `Drop` and the CLI allow running work to drain.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 2000;

/// Configuration for a [`Scheduler`](crate::Scheduler).
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use cadence::SchedulerConfig;
///
/// let config = SchedulerConfig::builder()
///     .pool_size(4)
///     .thread_name("poller-{}")
///     .monitor_interval(Duration::from_secs(1))
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads.
    ///
    /// Zero is accepted and provisions a single worker, so the scheduler can
    /// always make progress.
    pub pool_size: usize,

    /// Worker thread name pattern. The first `{}` is replaced by the worker
    /// index; without one, `-<index>` is appended.
    pub thread_name: String,

    /// Stack size for worker threads. Uses the runtime default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_stack_size: Option<usize>,

    /// Period of the usage monitor. No monitor runs when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_interval_ms: Option<u64>,

    /// How long a dropped scheduler waits for running work to stop.
    pub shutdown_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            thread_stack_size: None,
            monitor_interval_ms: None,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl SchedulerConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    /// Number of workers actually started.
    pub fn effective_pool_size(&self) -> usize {
        self.pool_size.max(1)
    }

    /// Usage monitor period, if enabled.
    pub fn monitor_interval(&self) -> Option<Duration> {
        self.monitor_interval_ms.map(Duration::from_millis)
    }

    /// Time allowed for work to drain on shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.pool_size > MAX_POOL_SIZE {
            return Err(SchedulerError::InvalidConfig(format!(
                "pool size {} exceeds maximum of {}",
                self.pool_size, MAX_POOL_SIZE
            )));
        }

        validate_name(&self.thread_name).map_err(SchedulerError::InvalidConfig)?;

        if let Some(stack) = self.thread_stack_size {
            if stack < MIN_STACK_SIZE {
                return Err(SchedulerError::InvalidConfig(format!(
                    "thread stack size {} is below minimum of {}",
                    stack, MIN_STACK_SIZE
                )));
            }
        }

        if let Some(interval) = self.monitor_interval_ms {
            if interval < MIN_MONITOR_INTERVAL_MS {
                return Err(SchedulerError::InvalidConfig(format!(
                    "monitor interval {}ms is below minimum of {}ms",
                    interval, MIN_MONITOR_INTERVAL_MS
                )));
            }
        }

        Ok(())
    }
}

/// Check a worker or job name.
pub(crate) fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("name must not be empty".to_string());
    }
    if name.contains('\0') {
        return Err("name must not contain NUL bytes".to_string());
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(format!(
            "name is {} bytes, maximum is {}",
            name.len(),
            MAX_NAME_LENGTH
        ));
    }
    Ok(())
}

/// Builder for [`SchedulerConfig`].
#[derive(Debug, Default)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    /// Number of worker threads.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.config.pool_size = size;
        self
    }

    /// Worker thread name pattern.
    pub fn thread_name(mut self, pattern: impl Into<String>) -> Self {
        self.config.thread_name = pattern.into();
        self
    }

    /// Worker thread stack size in bytes.
    pub fn thread_stack_size(mut self, bytes: usize) -> Self {
        self.config.thread_stack_size = Some(bytes);
        self
    }

    /// Enable the usage monitor.
    pub fn monitor_interval(mut self, interval: Duration) -> Self {
        let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self.config.monitor_interval_ms = Some(millis);
        self
    }

    /// Time allowed for work to drain on shutdown.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Finish building.
    pub fn build(self) -> SchedulerConfig {
        self.config
    }
}
