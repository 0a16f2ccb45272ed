//! AUTONOMIC stage
//!
//! Runs every registered neuron synchronously on the scheduler task, passes
//! the harvest through the filter chain, and pushes survivors onto the bus.
//! Never blocks on I/O.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::agent::identity::{AgentIdentity, UserModel};
use crate::agent::state::AgentState;
use crate::filter::{FilterContext, FilterRegistry};
use crate::neuron::{NeuronContext, NeuronRegistry};
use crate::signal::bus::SignalBus;

pub struct Autonomic {
    pub neurons: NeuronRegistry,
    pub filters: FilterRegistry,
}

impl Autonomic {
    pub fn new(neurons: NeuronRegistry, filters: FilterRegistry) -> Self {
        Self { neurons, filters }
    }

    /// One pass: apply pending registrations, run neurons, filter, push.
    ///
    /// Returns the number of signals that reached the bus. Push rejections
    /// (overflow) are already counted by the bus itself.
    pub fn run(
        &mut self,
        state: &AgentState,
        identity: &AgentIdentity,
        user: &UserModel,
        correlation_id: Uuid,
        now: DateTime<Utc>,
        bus: &SignalBus,
    ) -> usize {
        // Registration changes land exactly at the tick boundary
        self.neurons.apply_pending();

        let alertness = state.sleep.mode.level();
        let neuron_ctx = NeuronContext {
            state,
            identity,
            alertness,
            correlation_id,
            now,
        };
        let raw = self.neurons.run(&neuron_ctx);

        let filter_ctx = FilterContext {
            state,
            user,
            alertness,
            correlation_id,
            now,
        };
        let filtered = self.filters.run(raw, &filter_ctx);

        let mut pushed = 0;
        for signal in filtered {
            if bus.push(signal).is_ok() {
                pushed += 1;
            }
        }
        pushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::neuron::builtin::TickNeuron;
    use crate::signal::SignalType;

    #[test]
    fn neurons_flow_through_filters_to_the_bus() {
        let metrics = Metrics::new();
        let bus = SignalBus::with_default_capacity(metrics.clone());
        let mut neurons = NeuronRegistry::new(metrics.clone());
        neurons.register(Box::new(TickNeuron));
        let filters = FilterRegistry::new(metrics);
        let mut stage = Autonomic::new(neurons, filters);

        let state = AgentState::default();
        let identity = AgentIdentity::default();
        let user = UserModel::default();
        let corr = Uuid::new_v4();

        let pushed = stage.run(&state, &identity, &user, corr, Utc::now(), &bus);
        assert_eq!(pushed, 1);

        let drained = bus.drain(10);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].signal_type, SignalType::Tick);
        assert_eq!(drained[0].correlation_id, corr);
        assert_eq!(drained[0].source, "neuron.tick");
    }

    #[test]
    fn registration_applies_at_stage_entry() {
        let metrics = Metrics::new();
        let bus = SignalBus::with_default_capacity(metrics.clone());
        let neurons = NeuronRegistry::new(metrics.clone());
        let filters = FilterRegistry::new(metrics);
        let mut stage = Autonomic::new(neurons, filters);

        let state = AgentState::default();
        let identity = AgentIdentity::default();
        let user = UserModel::default();

        // Nothing registered: quiet pass
        assert_eq!(
            stage.run(&state, &identity, &user, Uuid::new_v4(), Utc::now(), &bus),
            0
        );

        // Register mid-stream; next pass picks it up
        stage.neurons.register(Box::new(TickNeuron));
        assert_eq!(
            stage.run(&state, &identity, &user, Uuid::new_v4(), Utc::now(), &bus),
            1
        );
    }
}
