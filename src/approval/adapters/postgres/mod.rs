//! `PostgreSQL` approval adapter.

mod models;
mod repository;
mod schema;

pub use repository::{ApprovalPgPool, PostgresApprovalRepository};
