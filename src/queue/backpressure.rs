use std::time::Duration;

/// How a producer reacts when `push` refuses admission. The queue itself
/// only reports the refusal; the policy lives with the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureStrategy {
    /// Give up immediately and surface the error.
    Drop,
    /// Yield to the scheduler once, then retry once.
    Yield,
    /// Sleep for the given duration, then retry once.
    Sleep(Duration),
    /// Wait until the queue signals freed capacity, retrying until admitted.
    Block,
}

impl Default for BackpressureStrategy {
    fn default() -> Self {
        BackpressureStrategy::Sleep(Duration::from_millis(10))
    }
}
