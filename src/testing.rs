//! Shared test support: deterministic clock and configuration builders.

use crate::pipeline::domain::{PipelineConfig, PipelineStage, StageConfig};
use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use mockable::Clock;
use std::sync::Mutex;

/// Deterministic clock that only moves when a test advances it.
pub(crate) struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub(crate) fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub(crate) fn epoch() -> Self {
        Self::at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().expect("valid timestamp"))
    }

    pub(crate) fn advance_minutes(&self, minutes: i64) {
        let mut now = self.now.lock().expect("clock lock");
        *now += Duration::minutes(minutes);
    }
}

impl Clock for FixedClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

/// Configuration with every stage enabled and no approvals.
pub(crate) fn all_stages_config() -> PipelineConfig {
    PipelineStage::ORDER
        .into_iter()
        .fold(PipelineConfig::new(), |config, stage| {
            config.with_stage(stage, StageConfig::enabled())
        })
}

/// Configuration enabling a contiguous prefix of the registry order.
pub(crate) fn prefix_config(len: usize) -> PipelineConfig {
    PipelineStage::ORDER
        .into_iter()
        .take(len)
        .fold(PipelineConfig::new(), |config, stage| {
            config.with_stage(stage, StageConfig::enabled())
        })
}
