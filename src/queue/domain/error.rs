//! Error types for queue domain validation and parsing.

use thiserror::Error;

/// Error returned while parsing queue item statuses from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown queue item status: {0}")]
pub struct ParseQueueItemStatusError(pub String);
