//! Unit tests for the approval context.

mod controller_tests;
