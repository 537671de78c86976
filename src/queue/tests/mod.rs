//! Unit tests for the queue context.

mod aging_tests;
mod priority_tests;
