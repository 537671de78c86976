//! Application services for the orchestrator context.

pub mod executor;
mod worker;

pub use executor::{ExecutionOutcome, StageExecutor, StageExecutorError, StageExecutorResult};
pub use worker::{OrchestratorConfig, Worker};
