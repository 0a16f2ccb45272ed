//! Stable agent identity
//!
//! Who the agent is, as opposed to how it currently feels. Loaded from
//! config at boot and never mutated by the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenderTag {
    #[default]
    Neutral,
    Female,
    Male,
}

/// Personality dials, each in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonalityTraits {
    pub humor: f64,
    pub formality: f64,
    pub curiosity: f64,
    pub patience: f64,
    pub empathy: f64,
    pub shyness: f64,
    pub independence: f64,
}

impl Default for PersonalityTraits {
    fn default() -> Self {
        Self {
            humor: 0.5,
            formality: 0.5,
            curiosity: 0.5,
            patience: 0.5,
            empathy: 0.5,
            shyness: 0.5,
            independence: 0.5,
        }
    }
}

impl PersonalityTraits {
    /// Clamp every dial into [0, 1]
    pub fn clamped(mut self) -> Self {
        for field in [
            &mut self.humor,
            &mut self.formality,
            &mut self.curiosity,
            &mut self.patience,
            &mut self.empathy,
            &mut self.shyness,
            &mut self.independence,
        ] {
            *field = field.clamp(0.0, 1.0);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentIdentity {
    pub name: String,
    pub gender: GenderTag,
    pub values: Vec<String>,
    pub boundaries: Vec<String>,
    pub traits: PersonalityTraits,
    pub preferences: BTreeMap<String, String>,
}

impl Default for AgentIdentity {
    fn default() -> Self {
        Self {
            name: "Vigil".to_string(),
            gender: GenderTag::Neutral,
            values: Vec::new(),
            boundaries: Vec::new(),
            traits: PersonalityTraits::default(),
            preferences: BTreeMap::new(),
        }
    }
}

/// Read-only view of the primary user, handed to filters and cognition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserModel {
    /// Primary chat target for proactive messages
    pub chat_id: Option<String>,
    pub name: Option<String>,
    /// IANA timezone, used for circadian and night-time decisions
    pub timezone: chrono_tz::Tz,
}

impl Default for UserModel {
    fn default() -> Self {
        Self {
            chat_id: None,
            name: None,
            timezone: chrono_tz::UTC,
        }
    }
}

impl UserModel {
    /// Local hour (0-23) for the user right now
    pub fn local_hour(&self, now: chrono::DateTime<chrono::Utc>) -> u32 {
        use chrono::Timelike;
        now.with_timezone(&self.timezone).hour()
    }

    /// Night is 23:00-06:59 local
    pub fn is_night(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        let hour = self.local_hour(now);
        hour >= 23 || hour < 7
    }
}
