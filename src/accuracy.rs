use crate::messages::AccuracyLevel;
use serde::Deserialize;

pub const DEFAULT_HIGH_MAX_DEG: f64 = 15.0;
pub const DEFAULT_MEDIUM_MAX_DEG: f64 = 30.0;

/// Upper bounds (in degrees) of the accuracy buckets.
///
/// Accuracy is an uncertainty, so a smaller value is a better reading.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AccuracyThresholds {
    #[serde(default = "default_high_max_deg")]
    pub high_max_deg: f64,
    #[serde(default = "default_medium_max_deg")]
    pub medium_max_deg: f64,
}

fn default_high_max_deg() -> f64 {
    DEFAULT_HIGH_MAX_DEG
}

fn default_medium_max_deg() -> f64 {
    DEFAULT_MEDIUM_MAX_DEG
}

impl Default for AccuracyThresholds {
    fn default() -> Self {
        Self {
            high_max_deg: DEFAULT_HIGH_MAX_DEG,
            medium_max_deg: DEFAULT_MEDIUM_MAX_DEG,
        }
    }
}

impl AccuracyThresholds {
    /// Bucket a raw accuracy value. The value itself is never altered.
    pub fn classify(&self, heading_accuracy: f64) -> AccuracyLevel {
        if heading_accuracy.is_nan() {
            AccuracyLevel::Unknown
        } else if heading_accuracy < 0.0 {
            AccuracyLevel::Unreliable
        } else if heading_accuracy <= self.high_max_deg {
            AccuracyLevel::High
        } else if heading_accuracy <= self.medium_max_deg {
            AccuracyLevel::Medium
        } else {
            AccuracyLevel::Low
        }
    }
}

/// Whether `level` satisfies `required`.
///
/// An `Unknown` level is never judged inaccurate, and an `Unknown`
/// requirement accepts anything.
pub fn meets_required(level: AccuracyLevel, required: AccuracyLevel) -> bool {
    match (level.rank(), required.rank()) {
        (Some(actual), Some(wanted)) => actual >= wanted,
        _ => true,
    }
}
