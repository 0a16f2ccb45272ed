//! Intents - what cognition wants to do
//!
//! Intents represent decisions, not effects. Cognition emits them; motor
//! executes them against ports and returns observations as signals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::state::StateField;
use crate::schedule::Recurrence;
use crate::signal::SignalType;

/// Links an intent back to the tick and signal that caused it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntentTrace {
    pub tick_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_signal_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    Plain,
    Markdown,
    Html,
}

/// Channel delivery options
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<ParseMode>,
    pub disable_link_preview: bool,
    pub silent: bool,
}

/// A command from cognition to the effectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Intent {
    /// Deliver text to a channel target
    SendMessage {
        target: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        #[serde(default)]
        options: MessageOptions,
    },

    /// Write one state field. Automatic fields reject tool-originated writes.
    UpdateState {
        field: StateField,
        value: f64,
        /// Interpret `value` as a delta instead of an absolute
        #[serde(default)]
        delta: bool,
        /// Set when the intent came out of a user-facing tool
        #[serde(default)]
        from_tool: bool,
    },

    /// Persist a future firing that re-enters the pipeline as a plugin_event
    Schedule {
        fire_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recurrence: Option<Recurrence>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<chrono_tz::Tz>,
        payload: serde_json::Value,
    },

    /// Invoke a registered tool
    CallTool {
        tool: String,
        args: serde_json::Value,
    },

    /// Quiet a signal class for a bounded time
    Defer {
        signal_type: SignalType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        hours: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value_at_ack: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        override_delta: Option<f64>,
        reason: String,
    },

    /// Quiet a signal class until explicitly cleared
    Suppress {
        signal_type: SignalType,
        reason: String,
    },
}

impl Intent {
    /// Short label for metrics and motor_result signals
    pub fn kind(&self) -> &'static str {
        match self {
            Intent::SendMessage { .. } => "send_message",
            Intent::UpdateState { .. } => "update_state",
            Intent::Schedule { .. } => "schedule",
            Intent::CallTool { .. } => "call_tool",
            Intent::Defer { .. } => "defer",
            Intent::Suppress { .. } => "suppress",
        }
    }
}

/// An intent plus its optional provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentEnvelope {
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<IntentTrace>,
}

impl IntentEnvelope {
    pub fn new(intent: Intent) -> Self {
        Self {
            intent,
            trace: None,
        }
    }

    pub fn with_trace(mut self, tick_id: Uuid, parent_signal_id: Option<Uuid>) -> Self {
        self.trace = Some(IntentTrace {
            tick_id,
            parent_signal_id,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_labels() {
        let intent = Intent::Suppress {
            signal_type: SignalType::ContactUrge,
            reason: "quiet hours".to_string(),
        };
        assert_eq!(intent.kind(), "suppress");
    }

    #[test]
    fn envelope_carries_trace() {
        let tick = Uuid::new_v4();
        let parent = Uuid::new_v4();
        let env = IntentEnvelope::new(Intent::CallTool {
            tool: "weather".to_string(),
            args: serde_json::json!({"city": "Berlin"}),
        })
        .with_trace(tick, Some(parent));

        let trace = env.trace.unwrap();
        assert_eq!(trace.tick_id, tick);
        assert_eq!(trace.parent_signal_id, Some(parent));
    }

    #[test]
    fn intents_round_trip_json() {
        let intent = Intent::SendMessage {
            target: "42".to_string(),
            text: "hello".to_string(),
            channel: None,
            options: MessageOptions {
                silent: true,
                ..Default::default()
            },
        };
        let json = serde_json::to_string(&intent).unwrap();
        let back: Intent = serde_json::from_str(&json).unwrap();
        assert_eq!(intent, back);
    }
}
