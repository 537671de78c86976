//! In-memory adapters for pipeline task persistence.

mod task;

pub use task::InMemoryTaskRepository;
