//! Ports through which approval services reach persistence.

mod repository;

pub use repository::{ApprovalRepository, ApprovalRepositoryError, ApprovalRepositoryResult};
