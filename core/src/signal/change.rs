//! Weber-Fechner change detection
//!
//! A change is significant when it exceeds a threshold proportional to the
//! magnitude of the previous value, scaled by alertness: a drowsy agent
//! needs a bigger jolt than an alert one.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChangeDetectorConfig {
    /// Absolute floor below which no change is ever significant
    pub min_absolute_change: f64,
    /// Relative threshold at full alertness
    pub base_threshold: f64,
    /// How much lowered alertness raises the relative threshold
    pub alertness_influence: f64,
    /// Upper bound on the relative threshold
    pub max_threshold: f64,
    /// Floor for the reference magnitude, so near-zero baselines still scale
    pub epsilon: f64,
}

impl Default for ChangeDetectorConfig {
    fn default() -> Self {
        Self {
            min_absolute_change: 0.05,
            base_threshold: 0.10,
            alertness_influence: 0.30,
            max_threshold: 0.50,
            epsilon: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeResult {
    pub is_significant: bool,
    /// |current - previous| / max(|previous|, epsilon)
    pub relative_change: f64,
    pub reason: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    config: ChangeDetectorConfig,
}

impl ChangeDetector {
    pub fn new(config: ChangeDetectorConfig) -> Self {
        Self { config }
    }

    /// Relative threshold at a given alertness in [0, 1]
    fn threshold(&self, alertness: f64) -> f64 {
        let c = &self.config;
        let raw = c.base_threshold + (1.0 - alertness.clamp(0.0, 1.0)) * c.alertness_influence;
        raw.clamp(c.base_threshold, c.max_threshold)
    }

    /// Test whether moving from `previous` to `current` is significant
    pub fn detect(&self, previous: f64, current: f64, alertness: f64) -> ChangeResult {
        let c = &self.config;
        let delta = (current - previous).abs();
        let reference = previous.abs().max(c.epsilon);
        let relative_change = delta / reference;

        if delta < c.min_absolute_change {
            return ChangeResult {
                is_significant: false,
                relative_change,
                reason: "below absolute floor",
            };
        }

        let required = self.threshold(alertness) * reference;
        if delta >= required.max(c.min_absolute_change) {
            ChangeResult {
                is_significant: true,
                relative_change,
                reason: "exceeds adaptive threshold",
            }
        } else {
            ChangeResult {
                is_significant: false,
                relative_change,
                reason: "within adaptive threshold",
            }
        }
    }
}
