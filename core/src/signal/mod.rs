//! Signal envelope types
//!
//! A signal is a typed, timestamped observation flowing through the
//! four-stage pipeline. Signals are immutable once emitted; producers own
//! them until they are pushed onto the bus.

pub mod ack;
pub mod bus;
pub mod change;
pub mod pattern;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of observation types crossing the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    UserMessage,
    SocialDebt,
    Energy,
    ContactPressure,
    Tick,
    HourChanged,
    TimeOfDay,
    PatternBreak,
    ThresholdCrossed,
    PluginEvent,
    MotorResult,
    Thought,
    MessageReaction,
    ContactUrge,
}

impl SignalType {
    /// Stable snake_case name, used in ack keys and metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::UserMessage => "user_message",
            SignalType::SocialDebt => "social_debt",
            SignalType::Energy => "energy",
            SignalType::ContactPressure => "contact_pressure",
            SignalType::Tick => "tick",
            SignalType::HourChanged => "hour_changed",
            SignalType::TimeOfDay => "time_of_day",
            SignalType::PatternBreak => "pattern_break",
            SignalType::ThresholdCrossed => "threshold_crossed",
            SignalType::PluginEvent => "plugin_event",
            SignalType::MotorResult => "motor_result",
            SignalType::Thought => "thought",
            SignalType::MessageReaction => "message_reaction",
            SignalType::ContactUrge => "contact_urge",
        }
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dequeue priority. `High` is never dropped by the bus.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
    Idle,
}

impl Priority {
    /// All priorities, highest first (dequeue order)
    pub const ALL: [Priority; 4] = [Priority::High, Priority::Normal, Priority::Low, Priority::Idle];

    /// Numeric rank, 0 = highest
    pub fn rank(&self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
            Priority::Idle => 3,
        }
    }
}

/// Scalar measurements attached to a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMetrics {
    /// Normalized intensity, clamped to [0, 1]
    pub value: f64,
    /// Signed slope of the underlying series, units per minute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_of_change: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<f64>,
    /// Producer confidence, clamped to [0, 1]
    pub confidence: f64,
}

impl Default for SignalMetrics {
    fn default() -> Self {
        Self {
            value: 0.0,
            rate_of_change: None,
            previous_value: None,
            confidence: 1.0,
        }
    }
}

/// Coarse day segmentation used by time-of-day signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayPart {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl DayPart {
    /// Classify a local hour (0-23)
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => DayPart::Morning,
            12..=17 => DayPart::Afternoon,
            18..=22 => DayPart::Evening,
            _ => DayPart::Night,
        }
    }
}

/// Typed payload variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalPayload {
    UserMessage {
        chat_id: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    Thought {
        content: String,
        /// Chain depth, derived from the triggering signal (0 for roots)
        depth: u8,
        /// Lowercased head of the content, used for the dedupe window
        dedupe_key: String,
    },
    Time {
        hour: u32,
        day_part: DayPart,
    },
    Pattern {
        name: String,
        signal_types: Vec<SignalType>,
        confidence: f64,
        reason: String,
    },
    PluginEvent {
        plugin_id: String,
        event: serde_json::Value,
    },
    MotorResult {
        intent_kind: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Reaction {
        chat_id: String,
        message_id: String,
        emoji: String,
    },
}

/// How many leading characters of a thought participate in deduplication
pub const THOUGHT_DEDUPE_HEAD: usize = 48;

/// Compute the dedupe key for a thought body
pub fn thought_dedupe_key(content: &str) -> String {
    content
        .chars()
        .take(THOUGHT_DEDUPE_HEAD)
        .collect::<String>()
        .to_lowercase()
}

/// A typed, timestamped observation entering the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub signal_type: SignalType,
    /// Dotted origin label: `neuron.<id>`, `sense.<channel>`, `plugin.<id>`,
    /// `meta.pattern_detector`, `cognition.thought`
    pub source: String,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    /// Groups signals emitted within the same tick
    pub correlation_id: Uuid,
    pub metrics: SignalMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<SignalPayload>,
}

impl Signal {
    /// Create a signal with default metrics at normal priority
    pub fn new(
        signal_type: SignalType,
        source: impl Into<String>,
        correlation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            signal_type,
            source: source.into(),
            priority: Priority::Normal,
            timestamp: now,
            correlation_id,
            metrics: SignalMetrics::default(),
            payload: None,
        }
    }

    /// Set the intensity value, clamped to [0, 1]
    pub fn with_value(mut self, value: f64) -> Self {
        self.metrics.value = value.clamp(0.0, 1.0);
        self
    }

    /// Set the previous value and derived rate of change
    pub fn with_previous(mut self, previous: f64, rate_of_change: f64) -> Self {
        self.metrics.previous_value = Some(previous);
        self.metrics.rate_of_change = Some(rate_of_change);
        self
    }

    /// Set producer confidence, clamped to [0, 1]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.metrics.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: SignalPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Thought depth if this is a thought signal
    pub fn thought_depth(&self) -> Option<u8> {
        match &self.payload {
            Some(SignalPayload::Thought { depth, .. }) => Some(*depth),
            _ => None,
        }
    }

    /// Validate envelope invariants; malformed signals are dropped at the bus
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.source.is_empty() {
            return Err(crate::error::VigilError::MalformedSignal {
                reason: "empty source".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.metrics.value) {
            return Err(crate::error::VigilError::MalformedSignal {
                reason: format!("value {} outside [0,1]", self.metrics.value),
            });
        }
        if !(0.0..=1.0).contains(&self.metrics.confidence) {
            return Err(crate::error::VigilError::MalformedSignal {
                reason: format!("confidence {} outside [0,1]", self.metrics.confidence),
            });
        }
        if self.signal_type == SignalType::Thought && self.payload.is_none() {
            return Err(crate::error::VigilError::MalformedSignal {
                reason: "thought signal without payload".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corr() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn value_is_clamped() {
        let s = Signal::new(SignalType::Energy, "neuron.energy", corr(), Utc::now())
            .with_value(1.7);
        assert_eq!(s.metrics.value, 1.0);

        let s = Signal::new(SignalType::Energy, "neuron.energy", corr(), Utc::now())
            .with_value(-0.2);
        assert_eq!(s.metrics.value, 0.0);
    }

    #[test]
    fn priority_order_is_high_first() {
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert!(Priority::Low < Priority::Idle);
        assert_eq!(Priority::ALL[0], Priority::High);
    }

    #[test]
    fn thought_requires_payload() {
        let s = Signal::new(SignalType::Thought, "cognition.thought", corr(), Utc::now());
        assert!(s.validate().is_err());

        let s = s.with_payload(SignalPayload::Thought {
            content: "what if".to_string(),
            depth: 0,
            dedupe_key: thought_dedupe_key("what if"),
        });
        assert!(s.validate().is_ok());
    }

    #[test]
    fn dedupe_key_is_lowercased_head() {
        let key = thought_dedupe_key("Should I Check In With The User About The Deadline Tomorrow?");
        assert!(key.len() <= THOUGHT_DEDUPE_HEAD);
        assert_eq!(key, key.to_lowercase());
        assert!(key.starts_with("should i check in"));
    }

    #[test]
    fn day_parts_cover_the_clock() {
        assert_eq!(DayPart::from_hour(6), DayPart::Morning);
        assert_eq!(DayPart::from_hour(13), DayPart::Afternoon);
        assert_eq!(DayPart::from_hour(20), DayPart::Evening);
        assert_eq!(DayPart::from_hour(2), DayPart::Night);
        assert_eq!(DayPart::from_hour(23), DayPart::Night);
    }
}
