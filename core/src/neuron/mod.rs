//! Neurons - state to signal producers
//!
//! A neuron inspects the agent state each tick and may emit one internal
//! signal. Neurons are synchronous, deterministic given their inputs, and
//! never touch I/O. Registration changes take effect at the next tick
//! boundary, never mid-tick.

pub mod builtin;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::agent::identity::AgentIdentity;
use crate::agent::state::AgentState;
use crate::error::Result;
use crate::metrics::{counters, Metrics};
use crate::signal::Signal;

/// Everything a neuron may look at during one check
pub struct NeuronContext<'a> {
    pub state: &'a AgentState,
    pub identity: &'a AgentIdentity,
    /// Current alertness level in [0, 1]
    pub alertness: f64,
    /// Correlation id of the current tick
    pub correlation_id: Uuid,
    pub now: DateTime<Utc>,
}

pub trait Neuron: Send {
    fn id(&self) -> &str;
    /// The signal type this neuron produces
    fn signal_type(&self) -> crate::signal::SignalType;
    fn description(&self) -> &str;

    /// Dotted source label stamped on emitted signals
    fn source(&self) -> String {
        format!("neuron.{}", self.id())
    }

    /// Inspect state; emit at most one signal
    fn check(&mut self, ctx: &NeuronContext<'_>) -> Result<Option<Signal>>;
}

/// Shared bookkeeping for neurons: refractory period and previous-value
/// memory.
#[derive(Debug, Clone)]
pub struct NeuronBase {
    refractory: ChronoDuration,
    last_emission: Option<DateTime<Utc>>,
    previous_value: Option<f64>,
}

impl NeuronBase {
    pub fn new(refractory: ChronoDuration) -> Self {
        Self {
            refractory,
            last_emission: None,
            previous_value: None,
        }
    }

    pub fn is_in_refractory_period(&self, now: DateTime<Utc>) -> bool {
        self.last_emission
            .is_some_and(|at| now - at < self.refractory)
    }

    pub fn record_emission(&mut self, now: DateTime<Utc>, value: f64) {
        self.last_emission = Some(now);
        self.previous_value = Some(value);
    }

    /// Update memory without emitting
    pub fn observe(&mut self, value: f64) {
        self.previous_value = Some(value);
    }

    pub fn previous_value(&self) -> Option<f64> {
        self.previous_value
    }
}

/// Registry of active neurons.
///
/// Additions and removals queue until `apply_pending`, which the heartbeat
/// calls at the top of each tick.
pub struct NeuronRegistry {
    active: Vec<Box<dyn Neuron>>,
    pending_add: Vec<Box<dyn Neuron>>,
    pending_remove: Vec<String>,
    metrics: Metrics,
}

impl NeuronRegistry {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            active: Vec::new(),
            pending_add: Vec::new(),
            pending_remove: Vec::new(),
            metrics,
        }
    }

    /// Queue a neuron for activation at the next tick boundary
    pub fn register(&mut self, neuron: Box<dyn Neuron>) {
        tracing::debug!(neuron = neuron.id(), "neuron queued for registration");
        self.pending_add.push(neuron);
    }

    /// Queue a removal at the next tick boundary
    pub fn remove(&mut self, id: impl Into<String>) {
        self.pending_remove.push(id.into());
    }

    /// Apply queued registration changes. Called between ticks only.
    pub fn apply_pending(&mut self) {
        for id in self.pending_remove.drain(..) {
            self.active.retain(|n| n.id() != id);
        }
        for neuron in self.pending_add.drain(..) {
            // Latest registration wins on id collision
            self.active.retain(|n| n.id() != neuron.id());
            self.active.push(neuron);
        }
    }

    /// Run every active neuron; faulty neurons are counted and skipped
    pub fn run(&mut self, ctx: &NeuronContext<'_>) -> Vec<Signal> {
        let mut signals = Vec::new();
        for neuron in self.active.iter_mut() {
            match neuron.check(ctx) {
                Ok(Some(signal)) => signals.push(signal),
                Ok(None) => {}
                Err(e) => {
                    self.metrics.incr(counters::NEURON_FAILURE);
                    tracing::warn!(neuron = neuron.id(), error = %e, "neuron check failed");
                }
            }
        }
        signals
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.active.iter().map(|n| n.id().to_string()).collect()
    }
}
