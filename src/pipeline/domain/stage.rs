//! Stage registry: the fixed stage order, checkpoints, and validated stage
//! plans.
//!
//! The registry order is static. A task's enabled stages must form a
//! non-empty, gap-free prefix of this order; the prefix is computed once at
//! task creation and never re-validated afterwards.

use super::{ParseCheckpointError, ParsePipelineStageError, PipelineDomainError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One named step in the fixed processing order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Document generation: turns the request into a working brief.
    Brief,
    /// Planning: produces the implementation plan.
    Plan,
    /// Implementation: produces the code changes.
    Implement,
    /// Review: critiques the produced changes.
    Review,
    /// Release: prepares release notes and hand-off.
    Release,
}

impl PipelineStage {
    /// All stages in registry order.
    pub const ORDER: [Self; 5] = [
        Self::Brief,
        Self::Plan,
        Self::Implement,
        Self::Review,
        Self::Release,
    ];

    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Brief => "brief",
            Self::Plan => "plan",
            Self::Implement => "implement",
            Self::Review => "review",
            Self::Release => "release",
        }
    }

    /// Returns the checkpoint guarding this stage's output.
    #[must_use]
    pub const fn checkpoint(self) -> Checkpoint {
        match self {
            Self::Brief => Checkpoint::BriefDocument,
            Self::Plan => Checkpoint::ImplementationPlan,
            Self::Implement => Checkpoint::CodeChanges,
            Self::Review => Checkpoint::ReviewVerdict,
            Self::Release => Checkpoint::ReleaseNotes,
        }
    }

    /// Returns the context key under which this stage's output is recorded.
    #[must_use]
    pub fn output_key(self) -> String {
        format!("{}_output", self.as_str())
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for PipelineStage {
    type Error = ParsePipelineStageError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "brief" => Ok(Self::Brief),
            "plan" => Ok(Self::Plan),
            "implement" => Ok(Self::Implement),
            "review" => Ok(Self::Review),
            "release" => Ok(Self::Release),
            _ => Err(ParsePipelineStageError(value.to_owned())),
        }
    }
}

/// A human-approval suspension point after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    /// Review of the generated working brief.
    BriefDocument,
    /// Review of the implementation plan.
    ImplementationPlan,
    /// Review of the produced code changes.
    CodeChanges,
    /// Review of the automated review verdict.
    ReviewVerdict,
    /// Sign-off on the release notes.
    ReleaseNotes,
}

impl Checkpoint {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BriefDocument => "brief_document",
            Self::ImplementationPlan => "implementation_plan",
            Self::CodeChanges => "code_changes",
            Self::ReviewVerdict => "review_verdict",
            Self::ReleaseNotes => "release_notes",
        }
    }

    /// Returns the stage whose output this checkpoint guards.
    #[must_use]
    pub const fn stage(self) -> PipelineStage {
        match self {
            Self::BriefDocument => PipelineStage::Brief,
            Self::ImplementationPlan => PipelineStage::Plan,
            Self::CodeChanges => PipelineStage::Implement,
            Self::ReviewVerdict => PipelineStage::Review,
            Self::ReleaseNotes => PipelineStage::Release,
        }
    }

    /// Static dashboard priority for pending-review ordering.
    ///
    /// Later checkpoints block more accumulated work, so they surface first.
    #[must_use]
    pub const fn review_priority(self) -> i16 {
        match self {
            Self::BriefDocument => 3,
            Self::ImplementationPlan => 4,
            Self::CodeChanges => 5,
            Self::ReviewVerdict => 7,
            Self::ReleaseNotes => 9,
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Checkpoint {
    type Error = ParseCheckpointError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "brief_document" => Ok(Self::BriefDocument),
            "implementation_plan" => Ok(Self::ImplementationPlan),
            "code_changes" => Ok(Self::CodeChanges),
            "review_verdict" => Ok(Self::ReviewVerdict),
            "release_notes" => Ok(Self::ReleaseNotes),
            _ => Err(ParseCheckpointError(value.to_owned())),
        }
    }
}

/// Validated, immutable list of a task's enabled stages.
///
/// Always a non-empty, gap-free prefix of [`PipelineStage::ORDER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StagePlan(Vec<PipelineStage>);

impl StagePlan {
    /// Computes the enabled-stage prefix from `{stage: enabled}` pairs.
    ///
    /// Stages absent from `pairs` count as disabled.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::StagePlanGap`] when an enabled stage
    /// follows a disabled one, or [`PipelineDomainError::EmptyStagePlan`]
    /// when nothing is enabled.
    pub fn from_enablement(
        pairs: &[(PipelineStage, bool)],
    ) -> Result<Self, PipelineDomainError> {
        let is_enabled = |stage: PipelineStage| {
            pairs
                .iter()
                .find(|(candidate, _)| *candidate == stage)
                .is_some_and(|(_, enabled)| *enabled)
        };

        let mut enabled_stages = Vec::new();
        let mut found_disabled = false;
        for stage in PipelineStage::ORDER {
            if is_enabled(stage) {
                if found_disabled {
                    return Err(PipelineDomainError::StagePlanGap(stage));
                }
                enabled_stages.push(stage);
            } else {
                found_disabled = true;
            }
        }

        if enabled_stages.is_empty() {
            return Err(PipelineDomainError::EmptyStagePlan);
        }
        Ok(Self(enabled_stages))
    }

    /// Reconstructs a plan from persisted storage without re-validation.
    ///
    /// The plan was validated at creation time and is immutable thereafter.
    #[must_use]
    pub const fn from_persisted(stages: Vec<PipelineStage>) -> Self {
        Self(stages)
    }

    /// Returns the enabled stages in registry order.
    #[must_use]
    pub fn stages(&self) -> &[PipelineStage] {
        &self.0
    }

    /// Returns the first enabled stage.
    #[must_use]
    pub fn first(&self) -> Option<PipelineStage> {
        self.0.first().copied()
    }

    /// Returns the last enabled stage.
    #[must_use]
    pub fn last(&self) -> Option<PipelineStage> {
        self.0.last().copied()
    }

    /// Returns whether the given stage is part of the plan.
    #[must_use]
    pub fn contains(&self, stage: PipelineStage) -> bool {
        self.0.contains(&stage)
    }

    /// Returns the enabled stage immediately following `stage`, if any.
    #[must_use]
    pub fn next_after(&self, stage: PipelineStage) -> Option<PipelineStage> {
        let mut stages = self.0.iter();
        stages.by_ref().find(|candidate| **candidate == stage)?;
        stages.next().copied()
    }
}
