//! In-memory adapters for stage queue persistence.

mod item;

pub use item::InMemoryQueueRepository;
