//! Runtime assembly
//!
//! Wires config, ports, plugins, and the pipeline into a ready heartbeat.
//! The binary stays thin: parse flags, load config, hand everything here.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::error::{Result, VigilError};
use crate::filter::{FilterRegistry, RestGateFilter};
use crate::heartbeat::Heartbeat;
use crate::metrics::Metrics;
use crate::neuron::builtin::{
    ClockNeuron, ContactPressureNeuron, ContactUrgeNeuron, DayPartNeuron, EnergyNeuron,
    SocialDebtNeuron, ThresholdNeuron, TickNeuron,
};
use crate::neuron::NeuronRegistry;
use crate::pipeline::{Aggregation, Autonomic, Cognition, Motor};
use crate::plugin::{Plugin, PluginHost};
use crate::port::channel::{Channel, ConsoleChannel};
use crate::port::llm::{HttpLlmClient, Llm};
use crate::port::storage::{FileStorage, Storage};
use crate::schedule::{ScheduleStore, SchedulerHandle};
use crate::signal::ack::AckRegistry;
use crate::signal::bus::SignalBus;
use crate::signal::change::ChangeDetector;
use crate::signal::pattern::PatternDetector;
use crate::agent::energy::EnergyModel;
use crate::agent::state::StateField;
use crate::tool::ToolRegistry;

/// Everything `build` produces
pub struct Runtime {
    pub heartbeat: Heartbeat,
    pub cancel: CancellationToken,
    pub metrics: Metrics,
    pub bus: SignalBus,
    pub plugin_host: PluginHost,
    pub scheduler: SchedulerHandle,
}

pub struct RuntimeBuilder {
    config: RuntimeConfig,
    llm: Option<Arc<dyn Llm>>,
    channels: Vec<Arc<dyn Channel>>,
    storage: Option<Arc<dyn Storage>>,
    plugins: Vec<Box<dyn Plugin>>,
    persist: bool,
}

impl RuntimeBuilder {
    pub fn from_config(config: RuntimeConfig) -> Self {
        Self {
            config,
            llm: None,
            channels: Vec::new(),
            storage: None,
            plugins: Vec::new(),
            persist: true,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn Llm>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_plugin(mut self, plugin: Box<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Keep everything in memory; used by tests and `--once` smoke runs
    pub fn ephemeral(mut self) -> Self {
        self.persist = false;
        self
    }

    pub fn build(self) -> Result<Runtime> {
        let config = self.config;
        let metrics = Metrics::new();
        let bus = SignalBus::with_default_capacity(metrics.clone());
        let cancel = CancellationToken::new();
        let data_dir = config.data_dir();

        let user = config
            .user
            .to_user_model()
            .map_err(|e| VigilError::InvalidConfig {
                message: e.to_string(),
            })?;

        // Ports
        let llm: Arc<dyn Llm> = match self.llm {
            Some(llm) => llm,
            None => Arc::new(HttpLlmClient::new(config.llm.clone())?),
        };
        let storage: Arc<dyn Storage> = match self.storage {
            Some(storage) => storage,
            None => Arc::new(FileStorage::new(data_dir.join("storage"))),
        };
        let scheduler = if self.persist {
            SchedulerHandle::with_store(ScheduleStore::new_in(data_dir.join("schedules")))?
        } else {
            SchedulerHandle::in_memory()
        };

        // Shared registries
        let tools = ToolRegistry::new();
        let change = ChangeDetector::new(config.change.clone());

        // Built-in neurons and filters
        let mut neurons = NeuronRegistry::new(metrics.clone());
        neurons.register(Box::new(TickNeuron));
        neurons.register(Box::new(ClockNeuron::new(user.timezone)));
        neurons.register(Box::new(DayPartNeuron::new(user.timezone)));
        neurons.register(Box::new(EnergyNeuron::new().with_detector(change.clone())));
        neurons.register(Box::new(
            SocialDebtNeuron::new().with_detector(change.clone()),
        ));
        neurons.register(Box::new(
            ContactPressureNeuron::new().with_detector(change.clone()),
        ));
        neurons.register(Box::new(ContactUrgeNeuron::default()));
        neurons.register(Box::new(ThresholdNeuron::rising(
            StateField::TaskPressure,
            0.8,
        )));
        neurons.register(Box::new(ThresholdNeuron::rising(
            StateField::ThoughtPressure,
            0.7,
        )));

        let mut filters = FilterRegistry::new(metrics.clone());
        filters.register(Box::new(RestGateFilter));

        // Plugins register the rest
        let mut plugin_host = PluginHost::new();
        let registrations = plugin_host.load(
            self.plugins,
            &config.plugins,
            storage.clone(),
            scheduler.clone(),
            bus.clone(),
            user.timezone,
        )?;
        for neuron in registrations.neurons {
            neurons.register(neuron);
        }
        for filter in registrations.filters {
            filters.register(filter);
        }
        for tool in registrations.tools {
            tools.register(tool);
        }
        for request in registrations.schedules {
            scheduler.schedule(request)?;
        }

        // Stages
        let autonomic = Autonomic::new(neurons, filters);
        let mut aggregation = Aggregation::new(
            config.aggregation.clone(),
            PatternDetector::new(config.pattern.clone()),
        );
        for rule in registrations.pattern_rules {
            aggregation.detector_mut().register(rule);
        }
        let acks = AckRegistry::new(config.ack.clone(), metrics.clone());
        let cognition = Arc::new(Cognition::new(
            llm,
            tools.clone(),
            config.cognition.clone(),
            metrics.clone(),
        ));

        let mut motor = Motor::new(
            config.motor.clone(),
            tools,
            scheduler.clone(),
            metrics.clone(),
        );
        if self.channels.is_empty() {
            motor.register_channel(Arc::new(ConsoleChannel::new()));
        }
        for channel in self.channels {
            motor.register_channel(channel);
        }

        let heartbeat = Heartbeat::new(
            config.heartbeat_config(),
            config.initial_state.to_state(),
            config.identity.clone(),
            user,
            EnergyModel::new(config.energy.clone()),
            bus.clone(),
            autonomic,
            aggregation,
            acks,
            cognition,
            motor,
            scheduler.clone(),
            metrics.clone(),
            cancel.clone(),
        );

        Ok(Runtime {
            heartbeat,
            cancel,
            metrics,
            bus,
            plugin_host,
            scheduler,
        })
    }
}
