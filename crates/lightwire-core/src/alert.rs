//! Threshold alerting on light readings.
//!
//! Each reading is checked against two independent, stateless predicates:
//! below `low` raises [`AlertLevel::Low`], above `high` raises
//! [`AlertLevel::High`]. There is no hysteresis, so a run of identical
//! qualifying readings raises one alert per reading.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Readings strictly below this value are "Low Light".
pub const DEFAULT_LOW_THRESHOLD: i16 = 50;

/// Readings strictly above this value are "High Light".
pub const DEFAULT_HIGH_THRESHOLD: i16 = 800;

/// Invalid threshold configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("low threshold {low} is above high threshold {high}")]
pub struct ThresholdError {
    pub low: i16,
    pub high: i16,
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Reading below the low threshold.
    Low,
    /// Reading above the high threshold.
    High,
}

impl AlertLevel {
    /// Human readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "Low Light",
            Self::High => "High Light",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Low/high bounds. Values inside `[low, high]` raise nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub low: i16,
    pub high: i16,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low: DEFAULT_LOW_THRESHOLD,
            high: DEFAULT_HIGH_THRESHOLD,
        }
    }
}

impl Thresholds {
    /// Creates validated thresholds.
    pub fn new(low: i16, high: i16) -> Result<Self, ThresholdError> {
        let thresholds = Self { low, high };
        thresholds.validate()?;
        Ok(thresholds)
    }

    /// Checks that `low <= high`.
    pub fn validate(&self) -> Result<(), ThresholdError> {
        if self.low > self.high {
            return Err(ThresholdError {
                low: self.low,
                high: self.high,
            });
        }
        Ok(())
    }

    /// Evaluates both predicates against one reading.
    pub fn evaluate(&self, value: i16) -> impl Iterator<Item = AlertLevel> + use<> {
        let low = (value < self.low).then_some(AlertLevel::Low);
        let high = (value > self.high).then_some(AlertLevel::High);
        low.into_iter().chain(high)
    }
}

/// An alert raised for one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightAlert {
    pub level: AlertLevel,
    pub value: i16,
    /// Sequence number of the reading that raised the alert.
    pub sequence: u64,
}

impl fmt::Display for LightAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.level, self.value)
    }
}
