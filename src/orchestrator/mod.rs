//! Orchestration context.
//!
//! Turns claimed queue items into stage runs: the executor drives a task
//! through its plan via the [`ports::StageRunner`] collaborator port, and
//! the worker polls the per-stage queues, sweeps approval timeouts, and
//! feeds claimed items to the executor.

pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
