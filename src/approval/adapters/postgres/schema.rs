//! Diesel schema for approval persistence.
//!
//! A partial unique index on `task_id` where the status is `pending` backs
//! the one-pending-request-per-task invariant at the store level.

diesel::table! {
    /// Checkpoint approval requests.
    approval_requests (id) {
        /// Request identifier.
        id -> Uuid,
        /// Owning task.
        task_id -> Uuid,
        /// Stage output under review.
        #[max_length = 50]
        checkpoint -> Varchar,
        /// Resolution status.
        #[max_length = 50]
        status -> Varchar,
        /// Artifact references attached for review.
        artifact_refs -> Jsonb,
        /// Brief summary for quick review.
        summary -> Nullable<Text>,
        /// Structured review context.
        details -> Nullable<Jsonb>,
        /// Dashboard ordering priority.
        priority -> Int2,
        /// When the request was created.
        created_at -> Timestamptz,
        /// When the request expires unattended.
        timeout_at -> Nullable<Timestamptz>,
        /// When the request was resolved.
        resolved_at -> Nullable<Timestamptz>,
        /// Whether an unattended timeout approves.
        auto_approve_on_timeout -> Bool,
    }
}

diesel::table! {
    /// Append-only audit trail of decisions.
    approval_actions (id) {
        /// Action identifier.
        id -> Uuid,
        /// The request acted on.
        request_id -> Uuid,
        /// The decision taken.
        #[max_length = 50]
        action -> Varchar,
        /// Who took the decision.
        #[max_length = 255]
        actor -> Varchar,
        /// Free-text comment.
        comment -> Nullable<Text>,
        /// Structured feedback for the stage re-run.
        feedback -> Nullable<Jsonb>,
        /// When the action was recorded.
        created_at -> Timestamptz,
    }
}

diesel::joinable!(approval_actions -> approval_requests (request_id));
diesel::allow_tables_to_appear_in_same_query!(approval_requests, approval_actions);
