//! Domain model for per-stage priority queues.
//!
//! Items carry an adjustable clamped priority; waiting items age upward over
//! time so low-priority work cannot starve indefinitely.

mod error;
mod item;
mod priority;

pub use error::ParseQueueItemStatusError;
pub use item::{AGING_INTERVAL_MINUTES, QueueItem, QueueItemId, QueueItemStatus};
pub use priority::Priority;
