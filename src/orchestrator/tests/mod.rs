//! Unit tests for the orchestrator context.

mod executor_tests;
