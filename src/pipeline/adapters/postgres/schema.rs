//! Diesel schema for task persistence.

diesel::table! {
    /// Task records flowing through the pipeline.
    tasks (id) {
        /// Task identifier.
        id -> Uuid,
        /// Lifecycle status.
        #[max_length = 50]
        status -> Varchar,
        /// Current-stage pointer, null before the first stage starts.
        #[max_length = 50]
        current_stage -> Nullable<Varchar>,
        /// Enabled-stage plan in registry order.
        plan -> Jsonb,
        /// Per-stage configuration payload.
        config -> Jsonb,
        /// Accumulated cross-stage context.
        context -> Jsonb,
        /// Accumulated usage totals.
        usage -> Jsonb,
        /// Error message retained on failure.
        error_message -> Nullable<Text>,
        /// Rework counter driven by rejections and `fix_needed` outcomes.
        retry_count -> Int4,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
    }
}
