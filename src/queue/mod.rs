//! Per-stage priority queues with aging-based starvation prevention.
//!
//! Each pipeline stage has its own durable queue. Items carry an adjustable
//! priority in `1..=10`; claiming is an atomic conditional update so
//! concurrent workers never take the same item, and a time-based aging sweep
//! bounds how long low-priority work can wait.
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Scheduling services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
