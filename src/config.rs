use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::dispatch::{BackoffStrategy, DispatchConfig, RetryConfig};
use crate::queue::QueueCapacity;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueTuning {
    pub max_items: usize,
    pub max_bytes: usize,
}

impl Default for QueueTuning {
    fn default() -> Self {
        let capacity = QueueCapacity::default();
        Self {
            max_items: capacity.max_items,
            max_bytes: capacity.max_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryTuning {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub strategy: BackoffStrategy,
    pub jitter: bool,
}

impl Default for RetryTuning {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            base_delay_ms: retry.base_delay.as_millis() as u64,
            max_delay_ms: retry.max_delay.as_millis() as u64,
            strategy: retry.strategy,
            jitter: retry.jitter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchTuning {
    pub workers: usize,
    pub poll_interval_ms: u64,
}

impl Default for DispatchTuning {
    fn default() -> Self {
        let dispatch = DispatchConfig::default();
        Self {
            workers: dispatch.workers,
            poll_interval_ms: dispatch.poll_interval.as_millis() as u64,
        }
    }
}

/// Tuning knobs for the delivery subsystem. The hosting agent parses its
/// own configuration sources and hands this struct in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub queue: QueueTuning,
    pub retry: RetryTuning,
    pub dispatch: DispatchTuning,
}

impl DeliveryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.max_items == 0 {
            return Err(ConfigError::Invalid("queue.max_items must be > 0".into()));
        }
        if self.queue.max_bytes == 0 {
            return Err(ConfigError::Invalid("queue.max_bytes must be > 0".into()));
        }
        if self.dispatch.workers == 0 {
            return Err(ConfigError::Invalid("dispatch.workers must be > 0".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn queue_capacity(&self) -> QueueCapacity {
        QueueCapacity {
            max_items: self.queue.max_items,
            max_bytes: self.queue.max_bytes,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            strategy: self.retry.strategy,
            jitter: self.retry.jitter,
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            workers: self.dispatch.workers,
            poll_interval: Duration::from_millis(self.dispatch.poll_interval_ms),
        }
    }
}
