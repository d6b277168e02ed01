pub mod backpressure;
pub mod error;
pub mod item;
pub mod manager;
pub mod metrics;
pub mod sender_queue;

pub use backpressure::BackpressureStrategy;
pub use error::{CapacityLimit, QueueError};
pub use item::{QueueKey, RawDataType, SenderQueueItem, SendingStatus, StatusCell};
pub use manager::QueueManager;
pub use metrics::{QueueStats, QueueStatsSnapshot};
pub use sender_queue::{QueueCapacity, SenderQueue};
