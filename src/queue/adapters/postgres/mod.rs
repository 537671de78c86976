//! `PostgreSQL` adapters for stage queue persistence.

mod models;
mod repository;
mod schema;

pub use repository::{PostgresQueueRepository, QueuePgPool};
