//! Agent state machine
//!
//! The sole mutable primary entity, owned by the heartbeat task. All ratios
//! stay in [0, 1]; all mutation flows through the tick method or the
//! UPDATE_STATE intent path in motor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::agent::energy::{DrainKind, EnergyModel};
use crate::agent::identity::PersonalityTraits;

/// Coarse arousal state scaling tick pace and filter sensitivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertnessMode {
    Alert,
    Normal,
    Relaxed,
    Sleep,
}

impl AlertnessMode {
    /// Tick interval multiplier for this mode
    pub fn tick_multiplier(&self) -> f64 {
        match self {
            AlertnessMode::Alert => 0.3,
            AlertnessMode::Normal => 1.0,
            AlertnessMode::Relaxed => 2.0,
            AlertnessMode::Sleep => 4.0,
        }
    }

    /// Alertness level fed to the change detector, in [0, 1]
    pub fn level(&self) -> f64 {
        match self {
            AlertnessMode::Alert => 1.0,
            AlertnessMode::Normal => 0.6,
            AlertnessMode::Relaxed => 0.3,
            AlertnessMode::Sleep => 0.1,
        }
    }

    /// Resting modes accumulate disturbance instead of reacting directly
    pub fn is_resting(&self) -> bool {
        matches!(self, AlertnessMode::Relaxed | AlertnessMode::Sleep)
    }
}

/// Sleep sub-state: mode plus the disturbance accumulator that can wake it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepState {
    pub mode: AlertnessMode,
    /// Accumulated disturbance in [0, 1] while resting
    pub disturbance: f64,
    /// Fraction of disturbance that decays each tick
    pub disturbance_decay: f64,
    /// Disturbance needed to wake; recomputed each tick from the energy
    /// model, so a tired agent takes more to rouse
    pub wake_threshold: f64,
}

impl Default for SleepState {
    fn default() -> Self {
        Self {
            mode: AlertnessMode::Normal,
            disturbance: 0.0,
            disturbance_decay: 0.2,
            wake_threshold: 0.5,
        }
    }
}

/// Clamp bounds for the dynamic tick interval
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TickBounds {
    pub min_secs: f64,
    pub max_secs: f64,
    pub base_secs: f64,
}

impl Default for TickBounds {
    fn default() -> Self {
        Self {
            min_secs: 1.0,
            max_secs: 60.0,
            base_secs: 5.0,
        }
    }
}

impl TickBounds {
    pub fn min(&self) -> Duration {
        Duration::from_secs_f64(self.min_secs)
    }

    pub fn max(&self) -> Duration {
        Duration::from_secs_f64(self.max_secs)
    }
}

/// Writable state fields addressable by UPDATE_STATE intents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    Energy,
    SocialDebt,
    TaskPressure,
    Curiosity,
    AcquaintancePressure,
    ThoughtPressure,
}

impl StateField {
    /// Automatic fields are owned by the state machine; user-facing tools
    /// may not write them.
    pub fn is_automatic(&self) -> bool {
        matches!(self, StateField::Energy | StateField::SocialDebt)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StateField::Energy => "energy",
            StateField::SocialDebt => "social_debt",
            StateField::TaskPressure => "task_pressure",
            StateField::Curiosity => "curiosity",
            StateField::AcquaintancePressure => "acquaintance_pressure",
            StateField::ThoughtPressure => "thought_pressure",
        }
    }
}

impl std::fmt::Display for StateField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// The agent's mutable internal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub energy: f64,
    pub social_debt: f64,
    pub task_pressure: f64,
    pub curiosity: f64,
    pub acquaintance_pressure: f64,
    pub thought_pressure: f64,
    pub pending_thought_count: usize,
    pub last_tick_at: DateTime<Utc>,
    /// Recomputed every tick, clamped to the configured bounds
    #[serde(with = "duration_secs")]
    pub tick_interval: Duration,
    pub sleep: SleepState,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs_f64().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            energy: 0.8,
            social_debt: 0.0,
            task_pressure: 0.0,
            curiosity: 0.3,
            acquaintance_pressure: 0.0,
            thought_pressure: 0.0,
            pending_thought_count: 0,
            last_tick_at: Utc::now(),
            tick_interval: Duration::from_secs(5),
            sleep: SleepState::default(),
        }
    }
}

impl AgentState {
    /// Read a field
    pub fn get(&self, field: StateField) -> f64 {
        match field {
            StateField::Energy => self.energy,
            StateField::SocialDebt => self.social_debt,
            StateField::TaskPressure => self.task_pressure,
            StateField::Curiosity => self.curiosity,
            StateField::AcquaintancePressure => self.acquaintance_pressure,
            StateField::ThoughtPressure => self.thought_pressure,
        }
    }

    /// Write a field, clamped to [0, 1] and rounded to 3 decimals
    pub fn set(&mut self, field: StateField, value: f64) {
        let value = round3(value.clamp(0.0, 1.0));
        match field {
            StateField::Energy => self.energy = value,
            StateField::SocialDebt => self.social_debt = value,
            StateField::TaskPressure => self.task_pressure = value,
            StateField::Curiosity => self.curiosity = value,
            StateField::AcquaintancePressure => self.acquaintance_pressure = value,
            StateField::ThoughtPressure => self.thought_pressure = value,
        }
    }

    /// Apply a delta to a field
    pub fn apply_delta(&mut self, field: StateField, delta: f64) {
        self.set(field, self.get(field) + delta);
    }

    /// Weighted reach-out pressure, modulated by energy.
    ///
    /// Input to the wake decision; never gates contact by itself.
    pub fn reach_out_pressure(&self, traits: &PersonalityTraits) -> f64 {
        let raw = self.social_debt * (1.0 - traits.shyness) * 0.4
            + self.task_pressure * traits.independence * 0.4
            + self.curiosity * traits.curiosity * 0.2;
        let modulation = 0.5 + self.energy * 0.5;
        (raw * modulation).clamp(0.0, 1.0)
    }

    /// Recompute the alertness mode. Rules are evaluated in order.
    pub fn recompute_alertness(&mut self, pressure: f64, night_time: bool) {
        let mode = if pressure > 0.7 || self.task_pressure > 0.8 {
            AlertnessMode::Alert
        } else if night_time && pressure < 0.3 && self.energy < 0.5 {
            AlertnessMode::Sleep
        } else if pressure < 0.3 && self.energy < 0.4 {
            AlertnessMode::Relaxed
        } else {
            AlertnessMode::Normal
        };

        if mode != self.sleep.mode {
            tracing::debug!(from = ?self.sleep.mode, to = ?mode, "alertness transition");
            self.sleep.mode = mode;
            if !mode.is_resting() {
                self.sleep.disturbance = 0.0;
            }
        }
    }

    /// Add disturbance while resting; wakes to normal past the threshold.
    ///
    /// Returns true when the agent woke up.
    pub fn add_disturbance(&mut self, amount: f64) -> bool {
        if !self.sleep.mode.is_resting() {
            return false;
        }
        self.sleep.disturbance = (self.sleep.disturbance + amount).clamp(0.0, 1.0);
        if self.sleep.disturbance > self.sleep.wake_threshold {
            tracing::debug!(disturbance = self.sleep.disturbance, "disturbance woke the agent");
            self.sleep.mode = AlertnessMode::Normal;
            self.sleep.disturbance = 0.0;
            return true;
        }
        false
    }

    /// Per-tick housekeeping: baseline drain, circadian recharge, social
    /// debt accrual, disturbance decay, wake threshold refresh.
    pub fn advance_tick(
        &mut self,
        energy_model: &EnergyModel,
        social_debt_rate: f64,
        local_hour: u32,
        now: DateTime<Utc>,
    ) {
        self.energy = energy_model.drain(self.energy, DrainKind::Tick);
        self.energy = energy_model.circadian_recharge(self.energy, local_hour);
        self.social_debt = (self.social_debt + social_debt_rate).clamp(0.0, 1.0);
        self.sleep.disturbance =
            (self.sleep.disturbance * (1.0 - self.sleep.disturbance_decay)).max(0.0);
        self.sleep.wake_threshold = energy_model.calculate_wake_threshold(self.energy);
        self.last_tick_at = now;
    }

    /// Recompute the tick interval from mode, energy, and pressure
    pub fn recompute_tick_interval(
        &mut self,
        bounds: &TickBounds,
        pressure: f64,
        energy_model: &EnergyModel,
    ) {
        let mode_mult = self.sleep.mode.tick_multiplier();
        let energy_mult = energy_model.calculate_tick_multiplier(self.energy);
        let pressure_mult = (1.0 - pressure * 0.5).max(0.5);
        let secs = (bounds.base_secs * mode_mult * energy_mult * pressure_mult)
            .clamp(bounds.min_secs, bounds.max_secs);
        self.tick_interval = Duration::from_secs_f64(secs);
    }

    /// Relief applied when a message actually goes out
    pub fn on_message_sent(&mut self, energy_model: &EnergyModel) {
        self.social_debt = (self.social_debt - 0.4).clamp(0.0, 1.0);
        self.energy = energy_model.drain(self.energy, DrainKind::MessageSent);
    }

    /// Positive reaction from the user
    pub fn on_positive_feedback(&mut self, energy_model: &EnergyModel) {
        self.social_debt = (self.social_debt - 0.1).clamp(0.0, 1.0);
        self.energy = energy_model.positive_feedback(self.energy);
    }

    /// All ratio fields, for invariant checks
    pub fn ratio_fields(&self) -> [(StateField, f64); 6] {
        [
            (StateField::Energy, self.energy),
            (StateField::SocialDebt, self.social_debt),
            (StateField::TaskPressure, self.task_pressure),
            (StateField::Curiosity, self.curiosity),
            (StateField::AcquaintancePressure, self.acquaintance_pressure),
            (StateField::ThoughtPressure, self.thought_pressure),
        ]
    }
}
