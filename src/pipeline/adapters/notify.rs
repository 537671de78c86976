//! Notifier adapters: structured-log delivery and a recording double.

use crate::pipeline::ports::{PipelineNotifier, TaskUpdate};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Notifier that publishes task updates as `tracing` events.
///
/// Stands in for a real-time dashboard or chat channel; transitions remain
/// observable in logs when no push transport is wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl TracingNotifier {
    /// Creates the notifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PipelineNotifier for TracingNotifier {
    async fn task_update(&self, update: TaskUpdate) {
        tracing::info!(
            task_id = %update.task_id,
            status = %update.status,
            stage = update.stage.map(|stage| stage.as_str()),
            message = %update.message,
            "task update"
        );
    }
}

/// Notifier that records every update in memory for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    updates: Arc<Mutex<Vec<TaskUpdate>>>,
}

impl RecordingNotifier {
    /// Creates an empty recording notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every update published so far.
    #[must_use]
    pub fn updates(&self) -> Vec<TaskUpdate> {
        self.updates
            .lock()
            .map(|updates| updates.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PipelineNotifier for RecordingNotifier {
    async fn task_update(&self, update: TaskUpdate) {
        if let Ok(mut updates) = self.updates.lock() {
            updates.push(update);
        }
    }
}
