//! Parsing errors for persisted approval values.

use thiserror::Error;

/// Raised when a persisted approval status cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised approval status: {0}")]
pub struct ParseApprovalStatusError(pub String);
