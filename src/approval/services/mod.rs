//! Application services for the approval context.

mod controller;

pub use controller::{ApprovalController, ApprovalControllerError, ApprovalControllerResult};
