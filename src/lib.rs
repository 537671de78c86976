//! Brunel: durable multi-stage delivery pipeline orchestration.
//!
//! This crate provides the core for driving software-delivery tasks through
//! an ordered pipeline of stages, with per-stage priority queues, human
//! checkpoint approvals, and resumable execution over a durable store.
//!
//! # Architecture
//!
//! Brunel follows hexagonal architecture principles:
//!
//! - **Domain**: Pure business logic with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for external interactions
//! - **Adapters**: Concrete implementations of ports (database, in-memory)
//!
//! # Modules
//!
//! - [`pipeline`]: Task aggregate, stage plan, and lifecycle services
//! - [`queue`]: Per-stage priority queues with aging and atomic claims
//! - [`approval`]: Checkpoint approval requests, decisions, and timeouts
//! - [`orchestrator`]: Stage execution and the polling worker loop

pub mod approval;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;

#[cfg(test)]
pub(crate) mod testing;
