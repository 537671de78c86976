//! Queue item aggregate: one (task, stage) entry waiting or in flight.

use super::{ParseQueueItemStatusError, Priority};
use crate::pipeline::domain::{PipelineStage, TaskId};
use chrono::{DateTime, Duration, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Minutes an item must wait before each aging increment.
pub const AGING_INTERVAL_MINUTES: i64 = 30;

/// Unique identifier for a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueItemId(Uuid);

impl QueueItemId {
    /// Creates a new random queue item identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a queue item identifier from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the wrapped UUID.
    #[must_use]
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for QueueItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of an item in a stage queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    /// Waiting to be claimed.
    Queued,
    /// Claimed by a worker and executing.
    Processing,
    /// Finished; the stage ran (or was superseded).
    Done,
    /// Finished with an error or retracted by cancellation.
    Failed,
}

impl QueueItemStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Returns whether this status counts toward the one-active-item
    /// invariant per (task, stage).
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Processing)
    }
}

impl fmt::Display for QueueItemStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for QueueItemStatus {
    type Error = ParseQueueItemStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseQueueItemStatusError(value.to_owned())),
        }
    }
}

/// One (task, stage) entry in a stage's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Item identifier.
    pub id: QueueItemId,
    /// Owning task.
    pub task_id: TaskId,
    /// Stage whose queue holds this item.
    pub stage: PipelineStage,
    /// Scheduling priority.
    pub priority: Priority,
    /// Label explaining the latest priority value.
    pub priority_reason: String,
    /// Queue status.
    pub status: QueueItemStatus,
    /// Pipeline context snapshot for the stage collaborator.
    pub context: Value,
    /// How many times this (task, stage) has been re-enqueued.
    pub retry_count: u32,
    /// Error recorded when the item failed.
    pub error_message: Option<String>,
    /// When the item entered the queue.
    pub enqueued_at: DateTime<Utc>,
    /// When a worker claimed the item.
    pub started_at: Option<DateTime<Utc>>,
    /// When the item reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Creates a queued item with a clamped priority.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        stage: PipelineStage,
        context: Value,
        priority: Priority,
        reason: impl Into<String>,
        clock: &impl Clock,
    ) -> Self {
        Self {
            id: QueueItemId::new(),
            task_id,
            stage,
            priority,
            priority_reason: reason.into(),
            status: QueueItemStatus::Queued,
            context,
            retry_count: 0,
            error_message: None,
            enqueued_at: clock.utc(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Sets the re-enqueue counter.
    #[must_use]
    pub const fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Computes the aged priority target for an item that has waited since
    /// `enqueued_at`: `min(MAX, MIN + floor(wait / interval))`.
    ///
    /// Returns `None` when aging would not raise the current priority, so
    /// aging is monotone non-decreasing and never lowers a manual boost.
    #[must_use]
    pub fn aged_target(&self, now: DateTime<Utc>) -> Option<Priority> {
        if self.status != QueueItemStatus::Queued {
            return None;
        }
        let waited: Duration = now - self.enqueued_at;
        let intervals = waited.num_minutes().div_euclid(AGING_INTERVAL_MINUTES);
        if intervals < 1 {
            return None;
        }
        let target = Priority::clamped(i64::from(Priority::MIN.value()).saturating_add(intervals));
        (target > self.priority).then_some(target)
    }
}
