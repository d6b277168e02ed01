pub mod backoff;
pub mod dispatcher;

pub use backoff::{BackoffPolicy, BackoffStrategy, RetryConfig};
pub use dispatcher::{DispatchConfig, DispatchStats, DispatchStatsSnapshot, FlushDispatcher};
