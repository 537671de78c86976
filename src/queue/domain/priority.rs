//! Clamped scheduling priority and its adjustment labels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheduling priority of a queue item, clamped to `1..=10`.
///
/// Higher values are served first; ties are broken by enqueue time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    /// Lowest schedulable priority.
    pub const MIN: Self = Self(1);
    /// Highest schedulable priority.
    pub const MAX: Self = Self(10);
    /// Default priority for newly enqueued work.
    pub const DEFAULT: Self = Self(5);

    /// Creates a priority, clamping the value into `1..=10`.
    #[must_use]
    pub const fn clamped(value: i64) -> Self {
        if value < Self::MIN.0 as i64 {
            Self::MIN
        } else if value > Self::MAX.0 as i64 {
            Self::MAX
        } else {
            #[expect(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                reason = "value is bounds-checked against the 1..=10 range above"
            )]
            Self(value as u8)
        }
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Returns this priority raised by `delta`, saturating at the maximum.
    #[must_use]
    pub const fn boosted_by(self, delta: u8) -> Self {
        let raised = self.0.saturating_add(delta);
        if raised > Self::MAX.0 {
            Self::MAX
        } else {
            Self(raised)
        }
    }

    /// Returns the larger of `self` and `other`.
    #[must_use]
    pub const fn max_with(self, other: Self) -> Self {
        if other.0 > self.0 { other } else { self }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}
