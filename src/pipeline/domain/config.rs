//! Typed per-stage configuration.
//!
//! Each stage carries a small typed configuration with a bounded free-form
//! extension point (`options`) and a rejection-feedback slot that checkpoint
//! rejections and `fix_needed` outcomes write into for the next run of the
//! stage.

use super::{PipelineDomainError, PipelineStage, StagePlan};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Default approval timeout applied when a checkpoint is configured without
/// an explicit one.
pub const DEFAULT_APPROVAL_TIMEOUT_MINUTES: i64 = 60;

/// Configuration for a single stage of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Whether the stage participates in the task's plan.
    pub enabled: bool,
    /// Whether the stage suspends on a checkpoint after completing.
    pub approval_required: bool,
    /// Minutes until an unattended checkpoint for this stage times out.
    pub timeout_minutes: i64,
    /// Whether a checkpoint timeout auto-approves instead of failing the
    /// task.
    pub auto_approve_on_timeout: bool,
    /// Opaque collaborator options (model, temperature, prompt knobs).
    pub options: Map<String, Value>,
    /// Structured critique from a rejection or `fix_needed` outcome, merged
    /// into the next run of this stage and cleared once consumed.
    pub rejection_feedback: Option<Value>,
}

impl StageConfig {
    /// Creates an enabled stage configuration with defaults.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            approval_required: false,
            timeout_minutes: DEFAULT_APPROVAL_TIMEOUT_MINUTES,
            auto_approve_on_timeout: false,
            options: Map::new(),
            rejection_feedback: None,
        }
    }

    /// Creates a disabled stage configuration.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            approval_required: false,
            timeout_minutes: DEFAULT_APPROVAL_TIMEOUT_MINUTES,
            auto_approve_on_timeout: false,
            options: Map::new(),
            rejection_feedback: None,
        }
    }

    /// Marks the stage as requiring approval before the pipeline continues.
    #[must_use]
    pub fn with_approval(mut self, timeout_minutes: i64, auto_approve_on_timeout: bool) -> Self {
        self.approval_required = true;
        self.timeout_minutes = timeout_minutes;
        self.auto_approve_on_timeout = auto_approve_on_timeout;
        self
    }

    /// Sets collaborator options.
    #[must_use]
    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = options;
        self
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Complete per-stage configuration for one task.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineConfig {
    stages: BTreeMap<PipelineStage, StageConfig>,
}

impl PipelineConfig {
    /// Creates an empty configuration (every stage disabled).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stages: BTreeMap::new(),
        }
    }

    /// Sets the configuration for a stage, replacing any existing entry.
    #[must_use]
    pub fn with_stage(mut self, stage: PipelineStage, config: StageConfig) -> Self {
        self.stages.insert(stage, config);
        self
    }

    /// Returns the configuration for a stage, defaulting to disabled.
    #[must_use]
    pub fn stage(&self, stage: PipelineStage) -> StageConfig {
        self.stages.get(&stage).cloned().unwrap_or_default()
    }

    /// Computes the validated enabled-stage plan for this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::StagePlanGap`] or
    /// [`PipelineDomainError::EmptyStagePlan`] when enablement is not a
    /// contiguous non-empty prefix of the registry order.
    pub fn stage_plan(&self) -> Result<StagePlan, PipelineDomainError> {
        let pairs: Vec<(PipelineStage, bool)> = PipelineStage::ORDER
            .into_iter()
            .map(|stage| (stage, self.stage(stage).enabled))
            .collect();
        StagePlan::from_enablement(&pairs)
    }

    /// Merges rejection feedback into a stage's configuration.
    pub fn set_rejection_feedback(&mut self, stage: PipelineStage, feedback: Value) {
        self.stages
            .entry(stage)
            .or_insert_with(StageConfig::enabled)
            .rejection_feedback = Some(feedback);
    }

    /// Clears consumed rejection feedback for a stage.
    pub fn clear_rejection_feedback(&mut self, stage: PipelineStage) {
        if let Some(config) = self.stages.get_mut(&stage) {
            config.rejection_feedback = None;
        }
    }
}
