//! Channel port
//!
//! A channel delivers outbound messages and pushes inbound ones onto the
//! signal bus as HIGH-priority `user_message` signals.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::agent::intent::MessageOptions;
use crate::error::Result;
use crate::signal::bus::SignalBus;
use crate::signal::{Priority, Signal, SignalPayload, SignalType};

/// What a channel can do beyond plain sends. Advertised at registration so
/// the core never probes for optional methods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelCapabilities {
    pub typing_indicator: bool,
    pub reactions: bool,
    pub message_editing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelHealth {
    pub available: bool,
    pub detail: Option<String>,
}

impl ChannelHealth {
    pub fn up() -> Self {
        Self {
            available: true,
            detail: None,
        }
    }
}

/// Proof of delivery
#[derive(Debug, Clone, PartialEq)]
pub struct SendReceipt {
    pub message_id: Option<String>,
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities::default()
    }

    async fn is_available(&self) -> bool;

    async fn send_message(
        &self,
        target: &str,
        text: &str,
        options: &MessageOptions,
    ) -> Result<SendReceipt>;

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn health(&self) -> ChannelHealth {
        ChannelHealth {
            available: self.is_available().await,
            detail: None,
        }
    }
}

/// Normalize an inbound message into a signal and push it to the bus.
///
/// All channel adapters route through this so the envelope is uniform:
/// type=user_message, priority=HIGH, source=`sense.<channel>`.
pub fn inbound_user_message(
    bus: &SignalBus,
    channel_name: &str,
    chat_id: impl Into<String>,
    text: impl Into<String>,
    user_id: Option<String>,
    message_id: Option<String>,
    now: DateTime<Utc>,
) -> Result<()> {
    let text = text.into();
    let signal = Signal::new(
        SignalType::UserMessage,
        format!("sense.{}", channel_name),
        // External signals get their own correlation id; the drain tick
        // regroups them
        Uuid::new_v4(),
        now,
    )
    .with_priority(Priority::High)
    .with_value(1.0)
    .with_payload(SignalPayload::UserMessage {
        chat_id: chat_id.into(),
        text,
        user_id,
        message_id,
    });
    bus.push(signal)
}

/// Development channel: logs outbound messages instead of delivering them.
pub struct ConsoleChannel {
    name: String,
}

impl ConsoleChannel {
    pub fn new() -> Self {
        Self {
            name: "console".to_string(),
        }
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn send_message(
        &self,
        target: &str,
        text: &str,
        options: &MessageOptions,
    ) -> Result<SendReceipt> {
        tracing::info!(
            channel = %self.name,
            target = %target,
            silent = options.silent,
            "outbound message: {}",
            text
        );
        Ok(SendReceipt {
            message_id: Some(Uuid::new_v4().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;

    #[tokio::test]
    async fn console_channel_returns_receipt() {
        let channel = ConsoleChannel::new();
        let receipt = channel
            .send_message("42", "hello", &MessageOptions::default())
            .await
            .unwrap();
        assert!(receipt.message_id.is_some());
    }

    #[test]
    fn inbound_message_lands_high_priority() {
        let bus = SignalBus::with_default_capacity(Metrics::new());
        inbound_user_message(&bus, "console", "42", "hello", None, None, Utc::now()).unwrap();

        let drained = bus.drain(10);
        assert_eq!(drained.len(), 1);
        let signal = &drained[0];
        assert_eq!(signal.signal_type, SignalType::UserMessage);
        assert_eq!(signal.priority, Priority::High);
        assert_eq!(signal.source, "sense.console");
        match &signal.payload {
            Some(SignalPayload::UserMessage { chat_id, text, .. }) => {
                assert_eq!(chat_id, "42");
                assert_eq!(text, "hello");
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }
}
