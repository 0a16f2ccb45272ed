//! AGGREGATION stage
//!
//! Condenses the drained bus into per-type aggregates, runs pattern
//! detection, gates everything through the ack registry, and emits the
//! tick's single wake decision.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::agent::state::AgentState;
use crate::pipeline::{Aggregate, WakeDecision, WakeReason};
use crate::signal::ack::AckRegistry;
use crate::signal::pattern::PatternDetector;
use crate::signal::{Priority, Signal, SignalPayload, SignalType};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Aggregated contact_pressure at or above this wakes cognition
    pub contact_wake_threshold: f64,
    /// Above this energy the lower wake threshold applies
    pub high_energy_threshold: f64,
    /// Wake threshold used while energy is high
    pub high_energy_wake_threshold: f64,
    /// Pattern confidence needed to wake cognition
    pub pattern_wake_confidence: f64,
    /// Pattern confidence needed to emit a pattern_break signal at all
    pub pattern_emit_confidence: f64,
    pub max_history: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            contact_wake_threshold: 0.6,
            high_energy_threshold: 0.7,
            high_energy_wake_threshold: 0.45,
            pattern_wake_confidence: 0.7,
            pattern_emit_confidence: 0.5,
            max_history: 32,
        }
    }
}

pub struct Aggregation {
    config: AggregationConfig,
    detector: PatternDetector,
    aggregates: HashMap<SignalType, Aggregate>,
}

impl Aggregation {
    pub fn new(config: AggregationConfig, detector: PatternDetector) -> Self {
        Self {
            config,
            detector,
            aggregates: HashMap::new(),
        }
    }

    pub fn detector_mut(&mut self) -> &mut PatternDetector {
        &mut self.detector
    }

    /// Rolling aggregate for a type, if any signal of it was ever seen
    pub fn aggregate(&self, signal_type: SignalType) -> Option<&Aggregate> {
        self.aggregates.get(&signal_type)
    }

    /// Effective contact wake threshold given current energy
    fn contact_threshold(&self, state: &AgentState) -> f64 {
        if state.energy > self.config.high_energy_threshold {
            self.config.high_energy_wake_threshold
        } else {
            self.config.contact_wake_threshold
        }
    }

    /// One pass over this tick's drained signals
    pub fn run(
        &mut self,
        drained: Vec<Signal>,
        acks: &mut AckRegistry,
        state: &AgentState,
        correlation_id: Uuid,
        now: DateTime<Utc>,
    ) -> WakeDecision {
        // 1. Aggregate by type, feed the pattern window
        let max_history = self.config.max_history;
        for signal in &drained {
            let value = signal.metrics.value;
            self.aggregates
                .entry(signal.signal_type)
                .and_modify(|agg| agg.fold(value, now, max_history))
                .or_insert_with(|| Aggregate::new(signal.signal_type, value, now));
            self.detector.observe(signal.signal_type, value, now);
        }

        // 2. Pattern detection appends pattern_break signals to the working set
        let mut working = drained;
        for found in self.detector.detect(now) {
            if found.confidence < self.config.pattern_emit_confidence {
                continue;
            }
            tracing::debug!(pattern = %found.name, confidence = found.confidence, "pattern matched");
            working.push(
                Signal::new(
                    SignalType::PatternBreak,
                    "meta.pattern_detector",
                    correlation_id,
                    now,
                )
                .with_priority(Priority::Normal)
                .with_value(found.confidence)
                .with_confidence(found.confidence)
                .with_payload(SignalPayload::Pattern {
                    name: found.name,
                    signal_types: found.signal_types,
                    confidence: found.confidence,
                    reason: found.reason,
                }),
            );
        }

        // 3. Ack gate
        let mut surviving = Vec::with_capacity(working.len());
        for signal in working {
            let check = acks.check(
                signal.signal_type,
                Some(signal.source.as_str()),
                Some(signal.metrics.value),
                now,
            );
            if check.blocked {
                tracing::trace!(signal_type = %signal.signal_type, "signal blocked by ack");
                continue;
            }
            surviving.push(signal);
        }

        // 4. Wake decision
        let reason = self.wake_reason(&surviving, state);
        WakeDecision {
            should_wake: reason.is_some(),
            reason,
            signals: surviving,
        }
    }

    fn wake_reason(&self, signals: &[Signal], state: &AgentState) -> Option<WakeReason> {
        if signals.iter().any(|s| s.priority == Priority::High) {
            return Some(WakeReason::HighPrioritySignal);
        }

        let contact = self
            .aggregates
            .get(&SignalType::ContactPressure)
            .map(|agg| agg.current_value)
            .unwrap_or(0.0);
        if contact >= self.contact_threshold(state) {
            return Some(WakeReason::ContactPressure);
        }

        if signals.iter().any(|s| {
            s.signal_type == SignalType::PatternBreak
                && s.metrics.confidence >= self.config.pattern_wake_confidence
        }) {
            return Some(WakeReason::PatternBreak);
        }

        if signals
            .iter()
            .any(|s| s.signal_type == SignalType::UserMessage)
        {
            return Some(WakeReason::UserMessage);
        }

        // Queued thoughts keep the chain moving even on an otherwise
        // quiet tick
        if signals.iter().any(|s| s.signal_type == SignalType::Thought) {
            return Some(WakeReason::Thought);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::signal::ack::AckConfig;
    use crate::signal::pattern::PatternDetectorConfig;

    fn stage() -> Aggregation {
        Aggregation::new(
            AggregationConfig::default(),
            PatternDetector::new(PatternDetectorConfig::default()),
        )
    }

    fn acks() -> AckRegistry {
        AckRegistry::new(AckConfig::default(), Metrics::new())
    }

    fn signal(signal_type: SignalType, priority: Priority, value: f64) -> Signal {
        Signal::new(signal_type, "neuron.test", Uuid::new_v4(), Utc::now())
            .with_priority(priority)
            .with_value(value)
    }

    #[test]
    fn quiet_tick_does_not_wake() {
        let mut stage = stage();
        let mut acks = acks();
        let state = AgentState::default();

        let decision = stage.run(
            vec![signal(SignalType::Tick, Priority::Idle, 1.0)],
            &mut acks,
            &state,
            Uuid::new_v4(),
            Utc::now(),
        );
        assert!(!decision.should_wake);
        assert!(decision.reason.is_none());
    }

    #[test]
    fn high_priority_signal_wakes() {
        let mut stage = stage();
        let mut acks = acks();
        let state = AgentState::default();

        let decision = stage.run(
            vec![signal(SignalType::UserMessage, Priority::High, 1.0)],
            &mut acks,
            &state,
            Uuid::new_v4(),
            Utc::now(),
        );
        assert!(decision.should_wake);
        assert_eq!(decision.reason, Some(WakeReason::HighPrioritySignal));
    }

    #[test]
    fn contact_pressure_threshold_wakes() {
        let mut stage = stage();
        let mut acks = acks();
        let mut state = AgentState::default();
        state.energy = 0.5;

        let decision = stage.run(
            vec![signal(SignalType::ContactPressure, Priority::Normal, 0.65)],
            &mut acks,
            &state,
            Uuid::new_v4(),
            Utc::now(),
        );
        assert!(decision.should_wake);
        assert_eq!(decision.reason, Some(WakeReason::ContactPressure));
    }

    #[test]
    fn high_energy_lowers_the_contact_bar() {
        let mut stage = stage();
        let mut acks = acks();
        let mut state = AgentState::default();

        // 0.5 pressure: below the 0.6 base threshold
        state.energy = 0.5;
        let decision = stage.run(
            vec![signal(SignalType::ContactPressure, Priority::Normal, 0.5)],
            &mut acks,
            &state,
            Uuid::new_v4(),
            Utc::now(),
        );
        assert!(!decision.should_wake);

        // Same pressure with high energy clears the lowered bar
        state.energy = 0.9;
        let decision = stage.run(
            vec![signal(SignalType::ContactPressure, Priority::Normal, 0.5)],
            &mut acks,
            &state,
            Uuid::new_v4(),
            Utc::now(),
        );
        assert!(decision.should_wake);
    }

    #[test]
    fn suppressed_signals_are_dropped() {
        let mut stage = stage();
        let mut acks = acks();
        let state = AgentState::default();
        let now = Utc::now();
        acks.register_suppressed(SignalType::ContactUrge, None, "quiet", now);

        let decision = stage.run(
            vec![signal(SignalType::ContactUrge, Priority::Normal, 0.8)],
            &mut acks,
            &state,
            Uuid::new_v4(),
            now,
        );
        assert!(decision.signals.is_empty());
    }

    #[test]
    fn handled_ack_is_consumed_without_dropping() {
        let mut stage = stage();
        let mut acks = acks();
        let state = AgentState::default();
        let now = Utc::now();
        acks.register_handled(SignalType::ContactUrge, None, "already replied", now);

        let decision = stage.run(
            vec![signal(SignalType::ContactUrge, Priority::Normal, 0.8)],
            &mut acks,
            &state,
            Uuid::new_v4(),
            now,
        );
        // The signal flows; the handled marker is gone
        assert_eq!(decision.signals.len(), 1);
        assert!(acks.is_empty());
    }

    #[test]
    fn deferral_override_unblocks_on_risen_value() {
        let mut stage = stage();
        let mut acks = acks();
        let state = AgentState::default();
        let now = Utc::now();
        acks.register_deferred(
            SignalType::ContactUrge,
            None,
            4.0,
            Some(0.4),
            Some(0.25),
            "later",
            now,
        );

        // 0.70 - 0.40 >= 0.25: override clears the deferral
        let decision = stage.run(
            vec![signal(SignalType::ContactUrge, Priority::Normal, 0.70)],
            &mut acks,
            &state,
            Uuid::new_v4(),
            now,
        );
        assert_eq!(decision.signals.len(), 1);
        assert!(acks.is_empty());
    }

    #[test]
    fn aggregates_roll_across_ticks() {
        let mut stage = stage();
        let mut acks = acks();
        let state = AgentState::default();
        let t0 = Utc::now();

        stage.run(
            vec![signal(SignalType::Energy, Priority::Low, 0.8)],
            &mut acks,
            &state,
            Uuid::new_v4(),
            t0,
        );
        stage.run(
            vec![signal(SignalType::Energy, Priority::Low, 0.6)],
            &mut acks,
            &state,
            Uuid::new_v4(),
            t0 + chrono::Duration::minutes(1),
        );

        let agg = stage.aggregate(SignalType::Energy).unwrap();
        assert_eq!(agg.count, 2);
        assert_eq!(agg.current_value, 0.6);
        assert!(agg.rate_of_change < 0.0);
    }
}
