//! Approval domain model: requests, actions, and their statuses.

mod action;
mod error;
mod request;

pub use action::{ApprovalAction, ApprovalActionId, SYSTEM_ACTOR};
pub use error::ParseApprovalStatusError;
pub use request::{ApprovalRequest, ApprovalRequestId, ApprovalStatus};
