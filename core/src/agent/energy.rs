//! Energy model
//!
//! The single place energy enters or leaves the agent. Every drain and
//! recharge routes through here so the [0, 1] clamp cannot be bypassed.

use serde::Deserialize;

/// What is costing the agent energy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainKind {
    /// Baseline cost of being awake for one tick
    Tick,
    /// An event made it through the pipeline
    EventProcessed,
    /// An expensive reasoning call
    LlmCall,
    /// A message went out
    MessageSent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    pub tick_drain: f64,
    pub event_drain: f64,
    pub llm_drain: f64,
    pub message_drain: f64,
    /// Passive per-tick recharge, always applied
    pub circadian_base: f64,
    /// Extra per-tick recharge during the user's morning
    pub morning_bonus: f64,
    /// One-off burst when the user reacts positively
    pub positive_feedback_bonus: f64,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            tick_drain: 0.002,
            event_drain: 0.01,
            llm_drain: 0.03,
            message_drain: 0.02,
            circadian_base: 0.004,
            morning_bonus: 0.006,
            positive_feedback_bonus: 0.10,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnergyModel {
    config: EnergyConfig,
}

impl EnergyModel {
    pub fn new(config: EnergyConfig) -> Self {
        Self { config }
    }

    fn drain_amount(&self, kind: DrainKind) -> f64 {
        match kind {
            DrainKind::Tick => self.config.tick_drain,
            DrainKind::EventProcessed => self.config.event_drain,
            DrainKind::LlmCall => self.config.llm_drain,
            DrainKind::MessageSent => self.config.message_drain,
        }
    }

    /// Apply a drain, returning the new clamped energy
    pub fn drain(&self, energy: f64, kind: DrainKind) -> f64 {
        (energy - self.drain_amount(kind)).clamp(0.0, 1.0)
    }

    /// Passive circadian recharge for one tick at the user's local hour.
    /// Mornings recharge faster.
    pub fn circadian_recharge(&self, energy: f64, local_hour: u32) -> f64 {
        let bonus = if (6..=11).contains(&local_hour) {
            self.config.morning_bonus
        } else {
            0.0
        };
        (energy + self.config.circadian_base + bonus).clamp(0.0, 1.0)
    }

    /// Positive-feedback burst
    pub fn positive_feedback(&self, energy: f64) -> f64 {
        (energy + self.config.positive_feedback_bonus).clamp(0.0, 1.0)
    }

    /// Disturbance needed to wake a sleeping agent. A tired agent takes more
    /// to rouse.
    pub fn calculate_wake_threshold(&self, energy: f64) -> f64 {
        (0.3 + (1.0 - energy.clamp(0.0, 1.0)) * 0.4).clamp(0.3, 0.7)
    }

    /// Tick pacing multiplier: a rested agent runs at base pace, a tired one
    /// slows down. Never speeds the heartbeat up on its own.
    pub fn calculate_tick_multiplier(&self, energy: f64) -> f64 {
        (1.0 + (1.0 - energy.clamp(0.0, 1.0)) * 0.5).clamp(1.0, 1.5)
    }
}
