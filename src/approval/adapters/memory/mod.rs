//! In-memory approval adapter.

mod request;

pub use request::InMemoryApprovalRepository;
