//! Built-in plugin bundle
//!
//! Plugins are enumerated at build time and handed to the host at boot.
//! This keeps extension loading auditable: what ships is what can run.

use chrono::{NaiveTime, Utc};
use vigil_core::error::Result;
use vigil_core::plugin::{
    Plugin, PluginManifest, PluginPrimitives, PrimitiveKind, Registrations,
};
use vigil_core::schedule::{Recurrence, ScheduleRequest};

/// Schedules a recurring morning check-in event in the user's timezone.
/// The pipeline treats the firing as a plugin_event; cognition decides
/// whether the moment is actually worth a message.
pub struct MorningCheckinPlugin;

impl Plugin for MorningCheckinPlugin {
    fn manifest(&self) -> PluginManifest {
        let mut manifest = PluginManifest::new("morning_checkin", "1.0.0");
        manifest.requires = vec![PrimitiveKind::Scheduler, PrimitiveKind::Timezone];
        manifest.provides = vec!["daily morning check-in schedule".to_string()];
        manifest
    }

    fn activate(&mut self, primitives: &PluginPrimitives) -> Result<Registrations> {
        let at = NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default();
        let recurrence = Recurrence::daily(at);
        let fire_at = recurrence.next_fire(Utc::now(), primitives.timezone)?;

        let mut registrations = Registrations::default();
        registrations.schedules.push(ScheduleRequest {
            fire_at,
            recurrence: Some(recurrence),
            timezone: Some(primitives.timezone),
            payload: serde_json::json!({"kind": "morning_checkin"}),
            plugin_id: None,
        });
        Ok(registrations)
    }
}

/// All plugins compiled into this binary
pub fn builtin_plugins() -> Vec<Box<dyn Plugin>> {
    vec![Box::new(MorningCheckinPlugin)]
}
