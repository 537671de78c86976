//! Application services for stage queue scheduling.

mod scheduler;

pub use scheduler::{QueueScheduler, QueueSchedulerError, QueueSchedulerResult};
