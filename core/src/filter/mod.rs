//! Filters - signal to signal transformers
//!
//! Filters run sequentially between the neurons and the bus; the output of
//! one is the input of the next. A failing filter passes its input through
//! unchanged and is counted, never propagated.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::agent::identity::UserModel;
use crate::agent::state::AgentState;
use crate::error::Result;
use crate::metrics::{counters, Metrics};
use crate::signal::{Priority, Signal, SignalType};

/// Read-only context handed to each filter
pub struct FilterContext<'a> {
    pub state: &'a AgentState,
    pub user: &'a UserModel,
    /// Current alertness level in [0, 1]
    pub alertness: f64,
    pub correlation_id: Uuid,
    pub now: DateTime<Utc>,
}

pub trait SignalFilter: Send {
    fn id(&self) -> &str;

    /// Signal types this filter wants; empty means all
    fn handles(&self) -> &[SignalType] {
        &[]
    }

    fn process(&mut self, signals: Vec<Signal>, ctx: &FilterContext<'_>) -> Result<Vec<Signal>>;
}

/// Ordered filter chain with per-filter error isolation
pub struct FilterRegistry {
    filters: Vec<Box<dyn SignalFilter>>,
    metrics: Metrics,
}

impl FilterRegistry {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            filters: Vec::new(),
            metrics,
        }
    }

    pub fn register(&mut self, filter: Box<dyn SignalFilter>) {
        tracing::debug!(filter = filter.id(), "filter registered");
        self.filters.push(filter);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run the chain. Each filter sees only the types it handles; untouched
    /// signals are carried around it and appended after its output.
    pub fn run(&mut self, signals: Vec<Signal>, ctx: &FilterContext<'_>) -> Vec<Signal> {
        let mut current = signals;
        for filter in self.filters.iter_mut() {
            let handles = filter.handles().to_vec();
            let (mut input, passthrough): (Vec<Signal>, Vec<Signal>) = if handles.is_empty() {
                (current, Vec::new())
            } else {
                current
                    .into_iter()
                    .partition(|s| handles.contains(&s.signal_type))
            };

            let original = input.clone();
            input = match filter.process(input, ctx) {
                Ok(output) => output,
                Err(e) => {
                    self.metrics.incr(counters::FILTER_FAILURE);
                    tracing::warn!(filter = filter.id(), error = %e, "filter failed, passing signals through");
                    original
                }
            };

            input.extend(passthrough);
            current = input;
        }
        current
    }
}

/// Built-in: while the agent rests, droppable signals are shed so only
/// meaningful events accumulate disturbance.
pub struct RestGateFilter;

impl SignalFilter for RestGateFilter {
    fn id(&self) -> &str {
        "rest_gate"
    }

    fn process(&mut self, signals: Vec<Signal>, ctx: &FilterContext<'_>) -> Result<Vec<Signal>> {
        if !ctx.state.sleep.mode.is_resting() {
            return Ok(signals);
        }
        Ok(signals
            .into_iter()
            .filter(|s| !matches!(s.priority, Priority::Low | Priority::Idle))
            .collect())
    }
}
