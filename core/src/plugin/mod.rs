//! Plugin host
//!
//! Plugins are enumerated at build time and handed to the host at boot; no
//! dynamic loading. Each activated plugin receives scoped primitives
//! (namespaced storage, scheduler handle, signal emitter, timezone) and
//! returns the neurons, filters, tools, and schedules it wants installed.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, VigilError};
use crate::filter::SignalFilter;
use crate::neuron::Neuron;
use crate::port::storage::{NamespacedStorage, Storage};
use crate::schedule::{ScheduleRequest, SchedulerHandle};
use crate::signal::bus::SignalBus;
use crate::signal::pattern::PatternRule;
use crate::signal::{Priority, Signal, SignalPayload, SignalType};
use crate::tool::Tool;

/// Host contract version; plugins built against another major are refused
pub const HOST_VERSION: u32 = 1;

/// Primitives a plugin may require at activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    Storage,
    Scheduler,
    Signals,
    Timezone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    pub version: String,
    /// Host contract this plugin was built against
    pub host_version: u32,
    pub requires: Vec<PrimitiveKind>,
    /// Human-readable summary of what the plugin registers
    pub provides: Vec<String>,
}

impl PluginManifest {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            host_version: HOST_VERSION,
            requires: Vec::new(),
            provides: Vec::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.id.is_empty() || !self.id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(VigilError::PluginRefused {
                id: self.id.clone(),
                reason: "invalid id".to_string(),
            });
        }
        if self.version.is_empty() {
            return Err(VigilError::PluginRefused {
                id: self.id.clone(),
                reason: "empty version".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PluginHealth {
    pub healthy: bool,
    pub detail: Option<String>,
}

impl PluginHealth {
    pub fn ok() -> Self {
        Self {
            healthy: true,
            detail: None,
        }
    }
}

/// Pushes plugin events onto the bus under the plugin's own source label
#[derive(Clone)]
pub struct SignalEmitter {
    bus: SignalBus,
    plugin_id: String,
}

impl SignalEmitter {
    pub fn emit(&self, event: serde_json::Value, priority: Priority) -> Result<()> {
        let signal = Signal::new(
            SignalType::PluginEvent,
            format!("plugin.{}", self.plugin_id),
            Uuid::new_v4(),
            Utc::now(),
        )
        .with_priority(priority)
        .with_value(0.5)
        .with_payload(SignalPayload::PluginEvent {
            plugin_id: self.plugin_id.clone(),
            event,
        });
        self.bus.push(signal)
    }
}

/// Scoped capabilities handed to a plugin at activation
pub struct PluginPrimitives {
    pub storage: NamespacedStorage,
    pub scheduler: SchedulerHandle,
    pub signals: SignalEmitter,
    pub timezone: chrono_tz::Tz,
    /// Per-plugin section of the config file, verbatim
    pub config: serde_json::Value,
}

/// What a plugin wants installed into the pipeline
#[derive(Default)]
pub struct Registrations {
    pub neurons: Vec<Box<dyn Neuron>>,
    pub filters: Vec<Box<dyn SignalFilter>>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub pattern_rules: Vec<Box<dyn PatternRule>>,
    pub schedules: Vec<ScheduleRequest>,
}

impl Registrations {
    fn merge(&mut self, other: Registrations) {
        self.neurons.extend(other.neurons);
        self.filters.extend(other.filters);
        self.tools.extend(other.tools);
        self.pattern_rules.extend(other.pattern_rules);
        self.schedules.extend(other.schedules);
    }
}

pub trait Plugin: Send {
    fn manifest(&self) -> PluginManifest;

    fn activate(&mut self, primitives: &PluginPrimitives) -> Result<Registrations>;

    fn deactivate(&mut self) -> Result<()> {
        Ok(())
    }

    fn health_check(&self) -> PluginHealth {
        PluginHealth::ok()
    }
}

/// Enable/disable lists from the config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// When non-empty, only these ids load
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
    /// Per-plugin free-form config sections
    pub config: BTreeMap<String, serde_json::Value>,
}

impl PluginsConfig {
    fn allows(&self, id: &str) -> bool {
        if self.disabled.iter().any(|d| d == id) {
            return false;
        }
        self.enabled.is_empty() || self.enabled.iter().any(|e| e == id)
    }
}

pub struct PluginHost {
    active: Vec<(PluginManifest, Box<dyn Plugin>)>,
    available_primitives: Vec<PrimitiveKind>,
}

impl PluginHost {
    pub fn new() -> Self {
        Self {
            active: Vec::new(),
            available_primitives: vec![
                PrimitiveKind::Storage,
                PrimitiveKind::Scheduler,
                PrimitiveKind::Signals,
                PrimitiveKind::Timezone,
            ],
        }
    }

    /// Load and activate a set of plugins, returning the merged pipeline
    /// registrations.
    ///
    /// Manifest syntax errors are fatal; version or primitive mismatches
    /// refuse just that plugin and keep loading the rest.
    pub fn load(
        &mut self,
        plugins: Vec<Box<dyn Plugin>>,
        config: &PluginsConfig,
        storage: Arc<dyn Storage>,
        scheduler: SchedulerHandle,
        bus: SignalBus,
        timezone: chrono_tz::Tz,
    ) -> Result<Registrations> {
        let mut merged = Registrations::default();

        for mut plugin in plugins {
            let manifest = plugin.manifest();
            manifest.validate()?;

            if !config.allows(&manifest.id) {
                tracing::info!(plugin = %manifest.id, "plugin disabled by config");
                continue;
            }
            if self.active.iter().any(|(m, _)| m.id == manifest.id) {
                tracing::warn!(plugin = %manifest.id, "duplicate plugin id, skipping");
                continue;
            }
            if manifest.host_version != HOST_VERSION {
                tracing::warn!(
                    plugin = %manifest.id,
                    built_for = manifest.host_version,
                    host = HOST_VERSION,
                    "plugin refused: host version mismatch"
                );
                continue;
            }
            if let Some(missing) = manifest
                .requires
                .iter()
                .find(|r| !self.available_primitives.contains(r))
            {
                tracing::warn!(
                    plugin = %manifest.id,
                    missing = ?missing,
                    "plugin refused: required primitive unavailable"
                );
                continue;
            }

            let primitives = PluginPrimitives {
                storage: NamespacedStorage::new(storage.clone(), manifest.id.clone()),
                scheduler: scheduler.clone(),
                signals: SignalEmitter {
                    bus: bus.clone(),
                    plugin_id: manifest.id.clone(),
                },
                timezone,
                config: config
                    .config
                    .get(&manifest.id)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null),
            };

            match plugin.activate(&primitives) {
                Ok(mut registrations) => {
                    // Schedules registered at activation carry the plugin id
                    for request in registrations.schedules.iter_mut() {
                        request.plugin_id = Some(manifest.id.clone());
                    }
                    tracing::info!(
                        plugin = %manifest.id,
                        version = %manifest.version,
                        neurons = registrations.neurons.len(),
                        filters = registrations.filters.len(),
                        tools = registrations.tools.len(),
                        "plugin activated"
                    );
                    merged.merge(registrations);
                    self.active.push((manifest, plugin));
                }
                Err(e) => {
                    tracing::warn!(plugin = %manifest.id, error = %e, "plugin activation failed, skipping");
                }
            }
        }

        Ok(merged)
    }

    /// Deactivate everything, cancelling plugin-owned schedules
    pub fn deactivate_all(&mut self, scheduler: &SchedulerHandle) {
        for (manifest, plugin) in self.active.iter_mut() {
            if let Err(e) = plugin.deactivate() {
                tracing::warn!(plugin = %manifest.id, error = %e, "plugin deactivation failed");
            }
            scheduler.cancel_plugin(&manifest.id);
        }
        self.active.clear();
    }

    pub fn health_report(&self) -> Vec<(String, PluginHealth)> {
        self.active
            .iter()
            .map(|(manifest, plugin)| (manifest.id.clone(), plugin.health_check()))
            .collect()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.active.iter().map(|(m, _)| m.id.clone()).collect()
    }
}

impl Default for PluginHost {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::neuron::builtin::TickNeuron;
    use crate::port::storage::MemoryStorage;

    struct GoodPlugin {
        manifest: PluginManifest,
    }

    impl GoodPlugin {
        fn new(id: &str) -> Self {
            Self {
                manifest: PluginManifest::new(id, "1.0.0"),
            }
        }
    }

    impl Plugin for GoodPlugin {
        fn manifest(&self) -> PluginManifest {
            self.manifest.clone()
        }

        fn activate(&mut self, primitives: &PluginPrimitives) -> Result<Registrations> {
            primitives
                .signals
                .emit(serde_json::json!({"hello": true}), Priority::Low)?;
            let mut registrations = Registrations::default();
            registrations.neurons.push(Box::new(TickNeuron));
            Ok(registrations)
        }
    }

    struct OldPlugin;

    impl Plugin for OldPlugin {
        fn manifest(&self) -> PluginManifest {
            let mut manifest = PluginManifest::new("old", "0.1.0");
            manifest.host_version = 99;
            manifest
        }

        fn activate(&mut self, _primitives: &PluginPrimitives) -> Result<Registrations> {
            Ok(Registrations::default())
        }
    }

    fn deps() -> (Arc<dyn Storage>, SchedulerHandle, SignalBus) {
        (
            Arc::new(MemoryStorage::new()),
            SchedulerHandle::in_memory(),
            SignalBus::with_default_capacity(Metrics::new()),
        )
    }

    #[test]
    fn good_plugin_activates_and_registers() {
        let (storage, scheduler, bus) = deps();
        let mut host = PluginHost::new();

        let merged = host
            .load(
                vec![Box::new(GoodPlugin::new("news"))],
                &PluginsConfig::default(),
                storage,
                scheduler,
                bus.clone(),
                chrono_tz::UTC,
            )
            .unwrap();

        assert_eq!(merged.neurons.len(), 1);
        assert_eq!(host.active_ids(), vec!["news".to_string()]);
        // The activation emitted a plugin_event onto the bus
        let drained = bus.drain(10);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].source, "plugin.news");
    }

    #[test]
    fn version_mismatch_is_refused_not_fatal() {
        let (storage, scheduler, bus) = deps();
        let mut host = PluginHost::new();

        let merged = host
            .load(
                vec![Box::new(OldPlugin), Box::new(GoodPlugin::new("news"))],
                &PluginsConfig::default(),
                storage,
                scheduler,
                bus,
                chrono_tz::UTC,
            )
            .unwrap();

        // The old plugin is skipped, the good one loads
        assert_eq!(host.active_ids(), vec!["news".to_string()]);
        assert_eq!(merged.neurons.len(), 1);
    }

    #[test]
    fn invalid_manifest_is_fatal() {
        struct BadIdPlugin;
        impl Plugin for BadIdPlugin {
            fn manifest(&self) -> PluginManifest {
                PluginManifest::new("bad id with spaces", "1.0")
            }
            fn activate(&mut self, _primitives: &PluginPrimitives) -> Result<Registrations> {
                Ok(Registrations::default())
            }
        }

        let (storage, scheduler, bus) = deps();
        let mut host = PluginHost::new();
        let result = host.load(
            vec![Box::new(BadIdPlugin)],
            &PluginsConfig::default(),
            storage,
            scheduler,
            bus,
            chrono_tz::UTC,
        );
        assert!(result.is_err());
    }

    #[test]
    fn disabled_plugins_are_skipped() {
        let (storage, scheduler, bus) = deps();
        let mut host = PluginHost::new();
        let config = PluginsConfig {
            disabled: vec!["news".to_string()],
            ..Default::default()
        };

        host.load(
            vec![Box::new(GoodPlugin::new("news"))],
            &config,
            storage,
            scheduler,
            bus,
            chrono_tz::UTC,
        )
        .unwrap();
        assert!(host.active_ids().is_empty());
    }

    #[test]
    fn enable_list_is_exclusive() {
        let (storage, scheduler, bus) = deps();
        let mut host = PluginHost::new();
        let config = PluginsConfig {
            enabled: vec!["weather".to_string()],
            ..Default::default()
        };

        host.load(
            vec![
                Box::new(GoodPlugin::new("news")),
                Box::new(GoodPlugin::new("weather")),
            ],
            &config,
            storage,
            scheduler,
            bus,
            chrono_tz::UTC,
        )
        .unwrap();
        assert_eq!(host.active_ids(), vec!["weather".to_string()]);
    }

    #[test]
    fn deactivation_cancels_plugin_schedules() {
        struct SchedulingPlugin;
        impl Plugin for SchedulingPlugin {
            fn manifest(&self) -> PluginManifest {
                PluginManifest::new("reminder", "1.0.0")
            }
            fn activate(&mut self, _primitives: &PluginPrimitives) -> Result<Registrations> {
                let mut registrations = Registrations::default();
                registrations.schedules.push(ScheduleRequest {
                    fire_at: Utc::now() + chrono::Duration::hours(1),
                    recurrence: None,
                    timezone: None,
                    payload: serde_json::json!({}),
                    plugin_id: None,
                });
                Ok(registrations)
            }
        }

        let (storage, scheduler, bus) = deps();
        let mut host = PluginHost::new();
        let merged = host
            .load(
                vec![Box::new(SchedulingPlugin)],
                &PluginsConfig::default(),
                storage,
                scheduler.clone(),
                bus,
                chrono_tz::UTC,
            )
            .unwrap();

        // The host stamped the owner onto the schedule request
        assert_eq!(merged.schedules[0].plugin_id.as_deref(), Some("reminder"));
        for request in merged.schedules {
            scheduler.schedule(request).unwrap();
        }
        assert_eq!(scheduler.get_schedules().len(), 1);

        host.deactivate_all(&scheduler);
        assert!(scheduler.get_schedules().is_empty());
    }
}
