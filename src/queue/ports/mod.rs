//! Port contracts for stage queue persistence.

pub mod repository;

pub use repository::{
    QueueRepository, QueueRepositoryError, QueueRepositoryResult, StageQueueCounts,
};
