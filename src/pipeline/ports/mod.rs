//! Port contracts for pipeline task persistence and observation.
//!
//! Ports define infrastructure-agnostic interfaces used by pipeline services.

pub mod notifier;
pub mod repository;

pub use notifier::{PipelineNotifier, TaskUpdate};
pub use repository::{TaskRepository, TaskRepositoryError, TaskRepositoryResult};
