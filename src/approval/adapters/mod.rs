//! Adapter implementations of the approval ports.

pub mod memory;
pub mod postgres;
