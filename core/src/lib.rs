//! Core library for vigil - a proactive agent runtime
//!
//! # Architecture
//! - `signal`: envelopes, priority bus, ack registry, change/pattern detectors
//! - `agent`: identity, energy model, the mutable state machine, intents
//! - `neuron` / `filter`: producers and transformers feeding the bus
//! - `pipeline`: the four stages (autonomic, aggregation, cognition, motor)
//! - `heartbeat`: the dynamic-interval main loop
//! - `plugin`: build-time-enumerated extension bundles
//! - `port`: channel / LLM / storage boundaries with bundled adapters
//! - `schedule`: persistent, DST-aware future firings

#![deny(unsafe_code)]

pub mod agent;
pub mod breaker;
pub mod config;
pub mod error;
pub mod filter;
pub mod heartbeat;
pub mod metrics;
pub mod neuron;
pub mod pipeline;
pub mod plugin;
pub mod port;
pub mod runtime;
pub mod schedule;
pub mod signal;
pub mod tool;

pub use agent::{
    AgentIdentity, AgentState, AlertnessMode, EnergyModel, Intent, IntentEnvelope, StateField,
    UserModel,
};
pub use breaker::{BreakerConfig, BreakerStats, BreakerStatus, CircuitBreaker};
pub use config::{ConfigError, RuntimeConfig};
pub use error::{Result, VigilError};
pub use heartbeat::{Heartbeat, HeartbeatConfig};
pub use metrics::Metrics;
pub use pipeline::{
    Aggregation, Autonomic, Cognition, CognitionConfig, Motor, WakeDecision, WakeReason,
};
pub use plugin::{Plugin, PluginHost, PluginManifest, Registrations};
pub use port::{Channel, Llm, Storage};
pub use runtime::{Runtime, RuntimeBuilder};
pub use signal::{bus::SignalBus, Priority, Signal, SignalPayload, SignalType};
pub use tool::{Tool, ToolOutput, ToolRegistry};
