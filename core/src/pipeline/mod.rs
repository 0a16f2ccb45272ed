//! The four-stage pipeline
//!
//! AUTONOMIC produces internal signals, AGGREGATION condenses the drained
//! bus into one wake decision, COGNITION turns situations into intents,
//! MOTOR applies them. Stage order within a tick is strict.

pub mod aggregation;
pub mod autonomic;
pub mod cognition;
pub mod motor;

pub use aggregation::{Aggregation, AggregationConfig};
pub use autonomic::Autonomic;
pub use cognition::{Cognition, CognitionAction, CognitionConfig, Situation, TurnOutcome};
pub use motor::{Motor, MotorConfig};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::agent::intent::IntentEnvelope;
use crate::signal::{Signal, SignalType};

/// Rolling per-type condensation of recent signals
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub signal_type: SignalType,
    /// Latest observed value
    pub current_value: f64,
    /// Slope, units per minute
    pub rate_of_change: f64,
    /// Signals folded in since creation
    pub count: usize,
    /// Short value history, newest last
    pub history: VecDeque<(DateTime<Utc>, f64)>,
    pub last_at: DateTime<Utc>,
}

impl Aggregate {
    pub(crate) fn new(signal_type: SignalType, value: f64, at: DateTime<Utc>) -> Self {
        let mut history = VecDeque::new();
        history.push_back((at, value));
        Self {
            signal_type,
            current_value: value,
            rate_of_change: 0.0,
            count: 1,
            history,
            last_at: at,
        }
    }

    pub(crate) fn fold(&mut self, value: f64, at: DateTime<Utc>, max_history: usize) {
        let minutes = (at - self.last_at).num_milliseconds() as f64 / 60_000.0;
        if minutes > f64::EPSILON {
            self.rate_of_change = (value - self.current_value) / minutes;
        }
        self.current_value = value;
        self.last_at = at;
        self.count += 1;
        self.history.push_back((at, value));
        while self.history.len() > max_history {
            self.history.pop_front();
        }
    }
}

/// Why the aggregation stage decided to wake cognition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    HighPrioritySignal,
    ContactPressure,
    PatternBreak,
    UserMessage,
    /// A queued thought is waiting for its turn
    Thought,
}

impl std::fmt::Display for WakeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WakeReason::HighPrioritySignal => write!(f, "high_priority_signal"),
            WakeReason::ContactPressure => write!(f, "contact_pressure"),
            WakeReason::PatternBreak => write!(f, "pattern_break"),
            WakeReason::UserMessage => write!(f, "user_message"),
            WakeReason::Thought => write!(f, "thought"),
        }
    }
}

/// The single output of the aggregation stage for one tick
#[derive(Debug, Clone)]
pub struct WakeDecision {
    pub should_wake: bool,
    pub reason: Option<WakeReason>,
    /// Signals that survived ack gating, in drain order
    pub signals: Vec<Signal>,
}

impl WakeDecision {
    pub fn quiet(signals: Vec<Signal>) -> Self {
        Self {
            should_wake: false,
            reason: None,
            signals,
        }
    }
}

/// Intent hand-off between cognition turns and motor.
///
/// Cognition turns run as their own task; motor drains on the heartbeat.
#[derive(Clone, Default)]
pub struct IntentQueue {
    inner: Arc<Mutex<VecDeque<IntentEnvelope>>>,
}

impl IntentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_all(&self, intents: Vec<IntentEnvelope>) {
        self.inner.lock().extend(intents);
    }

    pub fn drain_all(&self) -> Vec<IntentEnvelope> {
        self.inner.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
