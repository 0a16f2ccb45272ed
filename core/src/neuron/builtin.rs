//! Built-in neurons
//!
//! The producers every deployment gets: heartbeat activity, clock events,
//! energy and social-debt drift, contact pressure, and threshold watches.
//! Plugins add more through the host.

use chrono::{Duration as ChronoDuration, Timelike};

use crate::agent::state::StateField;
use crate::error::Result;
use crate::neuron::{Neuron, NeuronBase, NeuronContext};
use crate::signal::change::ChangeDetector;
use crate::signal::{DayPart, Priority, Signal, SignalPayload, SignalType};

/// Emits one IDLE tick signal per check; feeds the activity window
pub struct TickNeuron;

impl Neuron for TickNeuron {
    fn id(&self) -> &str {
        "tick"
    }

    fn signal_type(&self) -> SignalType {
        SignalType::Tick
    }

    fn description(&self) -> &str {
        "baseline heartbeat activity"
    }

    fn check(&mut self, ctx: &NeuronContext<'_>) -> Result<Option<Signal>> {
        Ok(Some(
            Signal::new(SignalType::Tick, self.source(), ctx.correlation_id, ctx.now)
                .with_priority(Priority::Idle)
                .with_value(1.0),
        ))
    }
}

/// Emits `hour_changed` when the user's local hour rolls over
pub struct ClockNeuron {
    timezone: chrono_tz::Tz,
    last_hour: Option<u32>,
}

impl ClockNeuron {
    pub fn new(timezone: chrono_tz::Tz) -> Self {
        Self {
            timezone,
            last_hour: None,
        }
    }
}

impl Neuron for ClockNeuron {
    fn id(&self) -> &str {
        "clock"
    }

    fn signal_type(&self) -> SignalType {
        SignalType::HourChanged
    }

    fn description(&self) -> &str {
        "local hour rollovers"
    }

    fn check(&mut self, ctx: &NeuronContext<'_>) -> Result<Option<Signal>> {
        let hour = ctx.now.with_timezone(&self.timezone).hour();
        let changed = self.last_hour.is_some_and(|last| last != hour);
        self.last_hour = Some(hour);
        if !changed {
            return Ok(None);
        }
        Ok(Some(
            Signal::new(
                SignalType::HourChanged,
                self.source(),
                ctx.correlation_id,
                ctx.now,
            )
            .with_priority(Priority::Low)
            .with_value(hour as f64 / 23.0)
            .with_payload(SignalPayload::Time {
                hour,
                day_part: DayPart::from_hour(hour),
            }),
        ))
    }
}

/// Emits `time_of_day` when the day part shifts (morning, afternoon, ...)
pub struct DayPartNeuron {
    timezone: chrono_tz::Tz,
    last_part: Option<DayPart>,
}

impl DayPartNeuron {
    pub fn new(timezone: chrono_tz::Tz) -> Self {
        Self {
            timezone,
            last_part: None,
        }
    }
}

impl Neuron for DayPartNeuron {
    fn id(&self) -> &str {
        "day_part"
    }

    fn signal_type(&self) -> SignalType {
        SignalType::TimeOfDay
    }

    fn description(&self) -> &str {
        "day part transitions"
    }

    fn check(&mut self, ctx: &NeuronContext<'_>) -> Result<Option<Signal>> {
        let hour = ctx.now.with_timezone(&self.timezone).hour();
        let part = DayPart::from_hour(hour);
        let changed = self.last_part.is_some_and(|last| last != part);
        self.last_part = Some(part);
        if !changed {
            return Ok(None);
        }
        Ok(Some(
            Signal::new(
                SignalType::TimeOfDay,
                self.source(),
                ctx.correlation_id,
                ctx.now,
            )
            .with_priority(Priority::Low)
            .with_value(0.5)
            .with_payload(SignalPayload::Time {
                hour,
                day_part: part,
            }),
        ))
    }
}

/// Emits `energy` when energy moves significantly, NORMAL priority once it
/// drops below the low-water mark
pub struct EnergyNeuron {
    base: NeuronBase,
    detector: ChangeDetector,
    low_water: f64,
}

impl EnergyNeuron {
    pub fn new() -> Self {
        Self {
            base: NeuronBase::new(ChronoDuration::minutes(5)),
            detector: ChangeDetector::default(),
            low_water: 0.2,
        }
    }

    pub fn with_detector(mut self, detector: ChangeDetector) -> Self {
        self.detector = detector;
        self
    }
}

impl Default for EnergyNeuron {
    fn default() -> Self {
        Self::new()
    }
}

impl Neuron for EnergyNeuron {
    fn id(&self) -> &str {
        "energy"
    }

    fn signal_type(&self) -> SignalType {
        SignalType::Energy
    }

    fn description(&self) -> &str {
        "significant energy drift"
    }

    fn check(&mut self, ctx: &NeuronContext<'_>) -> Result<Option<Signal>> {
        let current = ctx.state.energy;
        let Some(previous) = self.base.previous_value() else {
            self.base.observe(current);
            return Ok(None);
        };
        if self.base.is_in_refractory_period(ctx.now) {
            return Ok(None);
        }

        let change = self.detector.detect(previous, current, ctx.alertness);
        if !change.is_significant {
            return Ok(None);
        }

        self.base.record_emission(ctx.now, current);
        let priority = if current < self.low_water {
            Priority::Normal
        } else {
            Priority::Low
        };
        Ok(Some(
            Signal::new(SignalType::Energy, self.source(), ctx.correlation_id, ctx.now)
                .with_priority(priority)
                .with_value(current)
                .with_previous(previous, current - previous),
        ))
    }
}

/// Emits `social_debt` when accumulated debt moves significantly
pub struct SocialDebtNeuron {
    base: NeuronBase,
    detector: ChangeDetector,
}

impl SocialDebtNeuron {
    pub fn new() -> Self {
        Self {
            base: NeuronBase::new(ChronoDuration::minutes(10)),
            detector: ChangeDetector::default(),
        }
    }

    pub fn with_detector(mut self, detector: ChangeDetector) -> Self {
        self.detector = detector;
        self
    }
}

impl Default for SocialDebtNeuron {
    fn default() -> Self {
        Self::new()
    }
}

impl Neuron for SocialDebtNeuron {
    fn id(&self) -> &str {
        "social_debt"
    }

    fn signal_type(&self) -> SignalType {
        SignalType::SocialDebt
    }

    fn description(&self) -> &str {
        "significant social debt drift"
    }

    fn check(&mut self, ctx: &NeuronContext<'_>) -> Result<Option<Signal>> {
        let current = ctx.state.social_debt;
        let Some(previous) = self.base.previous_value() else {
            self.base.observe(current);
            return Ok(None);
        };
        if self.base.is_in_refractory_period(ctx.now) {
            return Ok(None);
        }

        let change = self.detector.detect(previous, current, ctx.alertness);
        if !change.is_significant {
            return Ok(None);
        }

        self.base.record_emission(ctx.now, current);
        Ok(Some(
            Signal::new(
                SignalType::SocialDebt,
                self.source(),
                ctx.correlation_id,
                ctx.now,
            )
            .with_priority(Priority::Low)
            .with_value(current)
            .with_previous(previous, current - previous),
        ))
    }
}

/// Publishes the computed reach-out pressure as `contact_pressure`
pub struct ContactPressureNeuron {
    base: NeuronBase,
    detector: ChangeDetector,
}

impl ContactPressureNeuron {
    pub fn new() -> Self {
        Self {
            base: NeuronBase::new(ChronoDuration::minutes(2)),
            detector: ChangeDetector::default(),
        }
    }

    pub fn with_detector(mut self, detector: ChangeDetector) -> Self {
        self.detector = detector;
        self
    }
}

impl Default for ContactPressureNeuron {
    fn default() -> Self {
        Self::new()
    }
}

impl Neuron for ContactPressureNeuron {
    fn id(&self) -> &str {
        "contact_pressure"
    }

    fn signal_type(&self) -> SignalType {
        SignalType::ContactPressure
    }

    fn description(&self) -> &str {
        "reach-out pressure updates"
    }

    fn check(&mut self, ctx: &NeuronContext<'_>) -> Result<Option<Signal>> {
        let current = ctx.state.reach_out_pressure(&ctx.identity.traits);
        let Some(previous) = self.base.previous_value() else {
            self.base.observe(current);
            return Ok(None);
        };
        if self.base.is_in_refractory_period(ctx.now) {
            return Ok(None);
        }

        let change = self.detector.detect(previous, current, ctx.alertness);
        if !change.is_significant {
            return Ok(None);
        }

        self.base.record_emission(ctx.now, current);
        Ok(Some(
            Signal::new(
                SignalType::ContactPressure,
                self.source(),
                ctx.correlation_id,
                ctx.now,
            )
            .with_value(current)
            .with_previous(previous, current - previous),
        ))
    }
}

/// Fires a `contact_urge` once pressure clears the urge threshold.
/// Refractory-limited so the agent does not nag itself every tick.
pub struct ContactUrgeNeuron {
    base: NeuronBase,
    urge_threshold: f64,
}

impl ContactUrgeNeuron {
    pub fn new(urge_threshold: f64) -> Self {
        Self {
            base: NeuronBase::new(ChronoDuration::minutes(30)),
            urge_threshold,
        }
    }
}

impl Default for ContactUrgeNeuron {
    fn default() -> Self {
        Self::new(0.55)
    }
}

impl Neuron for ContactUrgeNeuron {
    fn id(&self) -> &str {
        "contact_urge"
    }

    fn signal_type(&self) -> SignalType {
        SignalType::ContactUrge
    }

    fn description(&self) -> &str {
        "urge to reach out"
    }

    fn check(&mut self, ctx: &NeuronContext<'_>) -> Result<Option<Signal>> {
        let pressure = ctx.state.reach_out_pressure(&ctx.identity.traits);
        if pressure < self.urge_threshold || self.base.is_in_refractory_period(ctx.now) {
            return Ok(None);
        }
        self.base.record_emission(ctx.now, pressure);
        Ok(Some(
            Signal::new(
                SignalType::ContactUrge,
                self.source(),
                ctx.correlation_id,
                ctx.now,
            )
            .with_value(pressure)
            .with_confidence(pressure),
        ))
    }
}

/// Watches one state field crossing a threshold in either direction
pub struct ThresholdNeuron {
    field: StateField,
    threshold: f64,
    /// true = fire when rising past the threshold, false = falling below
    rising: bool,
    base: NeuronBase,
}

impl ThresholdNeuron {
    pub fn rising(field: StateField, threshold: f64) -> Self {
        Self {
            field,
            threshold,
            rising: true,
            base: NeuronBase::new(ChronoDuration::minutes(15)),
        }
    }

    pub fn falling(field: StateField, threshold: f64) -> Self {
        Self {
            field,
            threshold,
            rising: false,
            base: NeuronBase::new(ChronoDuration::minutes(15)),
        }
    }

    fn crossed(&self, previous: f64, current: f64) -> bool {
        if self.rising {
            previous < self.threshold && current >= self.threshold
        } else {
            previous > self.threshold && current <= self.threshold
        }
    }
}

impl Neuron for ThresholdNeuron {
    fn id(&self) -> &str {
        self.field.as_str()
    }

    fn signal_type(&self) -> SignalType {
        SignalType::ThresholdCrossed
    }

    fn description(&self) -> &str {
        "state threshold watch"
    }

    fn source(&self) -> String {
        format!("neuron.threshold.{}", self.field)
    }

    fn check(&mut self, ctx: &NeuronContext<'_>) -> Result<Option<Signal>> {
        let current = ctx.state.get(self.field);
        let Some(previous) = self.base.previous_value() else {
            self.base.observe(current);
            return Ok(None);
        };
        if !self.crossed(previous, current) || self.base.is_in_refractory_period(ctx.now) {
            self.base.observe(current);
            return Ok(None);
        }

        self.base.record_emission(ctx.now, current);
        Ok(Some(
            Signal::new(
                SignalType::ThresholdCrossed,
                self.source(),
                ctx.correlation_id,
                ctx.now,
            )
            .with_value(current)
            .with_previous(previous, current - previous),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::identity::AgentIdentity;
    use crate::agent::state::AgentState;
    use chrono::Utc;
    use uuid::Uuid;

    fn ctx<'a>(state: &'a AgentState, identity: &'a AgentIdentity) -> NeuronContext<'a> {
        NeuronContext {
            state,
            identity,
            alertness: 1.0,
            correlation_id: Uuid::new_v4(),
            now: Utc::now(),
        }
    }

    #[test]
    fn tick_neuron_always_fires_idle() {
        let state = AgentState::default();
        let identity = AgentIdentity::default();
        let mut neuron = TickNeuron;
        let signal = neuron.check(&ctx(&state, &identity)).unwrap().unwrap();
        assert_eq!(signal.signal_type, SignalType::Tick);
        assert_eq!(signal.priority, Priority::Idle);
    }

    #[test]
    fn energy_neuron_needs_a_baseline_first() {
        let mut state = AgentState::default();
        let identity = AgentIdentity::default();
        let mut neuron = EnergyNeuron::new();

        // First check establishes the baseline, no emission
        assert!(neuron.check(&ctx(&state, &identity)).unwrap().is_none());

        // Big drop emits
        state.energy = 0.3;
        let signal = neuron.check(&ctx(&state, &identity)).unwrap().unwrap();
        assert_eq!(signal.signal_type, SignalType::Energy);
        assert_eq!(signal.metrics.previous_value, Some(0.8));
    }

    #[test]
    fn energy_neuron_ignores_small_drift() {
        let mut state = AgentState::default();
        let identity = AgentIdentity::default();
        let mut neuron = EnergyNeuron::new();
        neuron.check(&ctx(&state, &identity)).unwrap();

        state.energy = 0.79;
        assert!(neuron.check(&ctx(&state, &identity)).unwrap().is_none());
    }

    #[test]
    fn contact_urge_respects_threshold_and_refractory() {
        let mut state = AgentState::default();
        let identity = AgentIdentity::default();
        let mut neuron = ContactUrgeNeuron::new(0.5);

        // Low pressure: quiet
        assert!(neuron.check(&ctx(&state, &identity)).unwrap().is_none());

        // Crank pressure up
        state.social_debt = 1.0;
        state.task_pressure = 1.0;
        state.curiosity = 1.0;
        state.energy = 1.0;
        let first = neuron.check(&ctx(&state, &identity)).unwrap();
        assert!(first.is_some());

        // Refractory: no immediate repeat
        assert!(neuron.check(&ctx(&state, &identity)).unwrap().is_none());
    }

    #[test]
    fn threshold_neuron_fires_on_rising_cross_only() {
        let mut state = AgentState::default();
        let identity = AgentIdentity::default();
        let mut neuron = ThresholdNeuron::rising(StateField::TaskPressure, 0.7);

        state.task_pressure = 0.5;
        assert!(neuron.check(&ctx(&state, &identity)).unwrap().is_none());

        // Still below: nothing
        state.task_pressure = 0.6;
        assert!(neuron.check(&ctx(&state, &identity)).unwrap().is_none());

        // Cross: fires
        state.task_pressure = 0.8;
        let signal = neuron.check(&ctx(&state, &identity)).unwrap().unwrap();
        assert_eq!(signal.signal_type, SignalType::ThresholdCrossed);
        assert!(signal.source.contains("task_pressure"));
    }

    #[test]
    fn clock_neuron_fires_only_on_rollover() {
        let state = AgentState::default();
        let identity = AgentIdentity::default();
        let mut neuron = ClockNeuron::new(chrono_tz::UTC);

        // First observation primes, no emission
        assert!(neuron.check(&ctx(&state, &identity)).unwrap().is_none());
        // Same hour: still nothing
        assert!(neuron.check(&ctx(&state, &identity)).unwrap().is_none());
    }
}
