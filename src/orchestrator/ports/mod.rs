//! Ports through which the orchestrator reaches stage collaborators.

mod runner;

pub use runner::{StageOutcome, StageRunner, StageRunnerError};
