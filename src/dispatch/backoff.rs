use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    ExponentialBackoff,
    LinearBackoff,
    FixedDelay,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::ExponentialBackoff,
            jitter: true,
        }
    }
}

/// Pure delay calculator used by the dispatcher when it requeues a
/// retryable failure.
#[derive(Debug, Clone, Default)]
pub struct BackoffPolicy {
    config: RetryConfig,
}

impl BackoffPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before the next attempt, given the try count that just
    /// failed (starting at 1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.config.base_delay.as_millis() as u64;
        let raw_ms = match self.config.strategy {
            BackoffStrategy::ExponentialBackoff => {
                let exponent = attempt.saturating_sub(1).min(32);
                2u64.checked_pow(exponent)
                    .and_then(|m| base_ms.checked_mul(m))
                    .unwrap_or(u64::MAX)
            }
            BackoffStrategy::LinearBackoff => base_ms.saturating_mul(attempt as u64),
            BackoffStrategy::FixedDelay => base_ms,
        };

        let capped = Duration::from_millis(raw_ms).min(self.config.max_delay);
        if self.config.jitter {
            apply_jitter(capped)
        } else {
            capped
        }
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let mut rng = rand::rng();
    let jitter_factor = rng.random_range(0.5..1.5); // ±50% jitter
    let jittered_millis = (delay.as_millis() as f64 * jitter_factor) as u64;
    Duration::from_millis(jittered_millis)
}
