//! Task pipeline context.
//!
//! Owns the task aggregate: the lifecycle state machine, the per-stage
//! configuration and its validated stage plan, accumulated cross-stage
//! context, and usage accounting. Services here create, look up, and cancel
//! tasks; advancing a task through its stages belongs to the orchestrator
//! context.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
