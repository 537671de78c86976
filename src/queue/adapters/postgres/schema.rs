//! Diesel schema for stage queue persistence.
//!
//! A partial unique index on `(task_id, stage)` where the status is active
//! backs the one-active-item invariant at the store level.

diesel::table! {
    /// Per-stage queue entries.
    queue_items (id) {
        /// Item identifier.
        id -> Uuid,
        /// Owning task.
        task_id -> Uuid,
        /// Stage whose queue holds the item.
        #[max_length = 50]
        stage -> Varchar,
        /// Scheduling priority (1..=10).
        priority -> Int2,
        /// Label explaining the latest priority value.
        #[max_length = 255]
        priority_reason -> Varchar,
        /// Queue status.
        #[max_length = 50]
        status -> Varchar,
        /// Pipeline context snapshot.
        context -> Jsonb,
        /// Re-enqueue counter.
        retry_count -> Int4,
        /// Error recorded on failure.
        error_message -> Nullable<Text>,
        /// When the item entered the queue.
        enqueued_at -> Timestamptz,
        /// When a worker claimed the item.
        started_at -> Nullable<Timestamptz>,
        /// When the item reached a terminal status.
        completed_at -> Nullable<Timestamptz>,
    }
}
