//! MOTOR stage
//!
//! Applies intents in order against ports. Sends go through a per-channel
//! circuit breaker with bounded retry; state writes are synchronous and
//! policy-checked; every intent reports a motor_result signal. One failing
//! intent never stops the batch.

use rand::Rng;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::agent::energy::EnergyModel;
use crate::agent::intent::{Intent, IntentEnvelope};
use crate::agent::state::AgentState;
use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::error::{Result, VigilError};
use crate::metrics::{counters, Metrics};
use crate::port::channel::Channel;
use crate::schedule::{ScheduleRequest, SchedulerHandle};
use crate::signal::ack::AckRegistry;
use crate::signal::bus::SignalBus;
use crate::signal::{Priority, Signal, SignalPayload, SignalType};
use crate::tool::ToolRegistry;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    /// Retries after the first attempt
    pub send_retries: u32,
    /// Base backoff between attempts, doubled each retry plus jitter
    pub retry_base_delay_ms: u64,
    /// Breaker failure threshold per channel
    pub breaker_max_failures: u32,
    pub breaker_reset_timeout_secs: u64,
    /// Deadline for one channel send
    pub send_timeout_secs: u64,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            send_retries: 2,
            retry_base_delay_ms: 200,
            breaker_max_failures: 3,
            breaker_reset_timeout_secs: 60,
            send_timeout_secs: 30,
        }
    }
}

pub struct Motor {
    config: MotorConfig,
    channels: HashMap<String, Arc<dyn Channel>>,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
    default_channel: String,
    tools: ToolRegistry,
    scheduler: SchedulerHandle,
    metrics: Metrics,
}

impl Motor {
    pub fn new(
        config: MotorConfig,
        tools: ToolRegistry,
        scheduler: SchedulerHandle,
        metrics: Metrics,
    ) -> Self {
        Self {
            config,
            channels: HashMap::new(),
            breakers: HashMap::new(),
            default_channel: String::new(),
            tools,
            scheduler,
            metrics,
        }
    }

    /// Register a channel; the first one becomes the default
    pub fn register_channel(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        let breaker = CircuitBreaker::new(
            BreakerConfig::new(format!("channel.{}", name))
                .with_max_failures(self.config.breaker_max_failures)
                .with_reset_timeout(Duration::from_secs(self.config.breaker_reset_timeout_secs))
                .with_op_timeout(Duration::from_secs(self.config.send_timeout_secs)),
            self.metrics.clone(),
        );
        if self.default_channel.is_empty() {
            self.default_channel = name.clone();
        }
        self.breakers.insert(name.clone(), Arc::new(breaker));
        self.channels.insert(name, channel);
    }

    pub fn breaker_stats(&self, channel: &str) -> Option<crate::breaker::BreakerStats> {
        self.breakers.get(channel).map(|b| b.stats())
    }

    /// Start every registered channel
    pub async fn start_channels(&self) {
        for channel in self.channels.values() {
            if let Err(e) = channel.start().await {
                tracing::warn!(channel = channel.name(), error = %e, "channel failed to start");
            }
        }
    }

    /// Stop every registered channel, used at shutdown
    pub async fn stop_channels(&self) {
        for channel in self.channels.values() {
            if let Err(e) = channel.stop().await {
                tracing::warn!(channel = channel.name(), error = %e, "channel failed to stop");
            }
        }
    }

    /// Apply a batch of intents in order. Each result is reported back onto
    /// the bus as a motor_result signal.
    pub async fn execute_all(
        &self,
        intents: Vec<IntentEnvelope>,
        state: &mut AgentState,
        acks: &mut AckRegistry,
        energy: &EnergyModel,
        bus: &SignalBus,
        correlation_id: Uuid,
    ) -> usize {
        let mut succeeded = 0;
        for envelope in intents {
            let kind = envelope.intent.kind();
            let result = self.execute_one(envelope, state, acks, energy).await;
            let now = chrono::Utc::now();
            match result {
                Ok(detail) => {
                    succeeded += 1;
                    let _ = bus.push(
                        Signal::new(SignalType::MotorResult, "motor", correlation_id, now)
                            .with_priority(Priority::Low)
                            .with_value(1.0)
                            .with_payload(SignalPayload::MotorResult {
                                intent_kind: kind.to_string(),
                                success: true,
                                detail,
                            }),
                    );
                }
                Err(e) => {
                    if e.is_silent() {
                        continue;
                    }
                    self.metrics.incr(counters::INTENT_REJECTED);
                    tracing::warn!(intent = kind, error = %e, "intent failed");
                    let _ = bus.push(
                        Signal::new(SignalType::MotorResult, "motor", correlation_id, now)
                            .with_priority(Priority::Normal)
                            .with_value(0.0)
                            .with_payload(SignalPayload::MotorResult {
                                intent_kind: kind.to_string(),
                                success: false,
                                detail: Some(e.to_string()),
                            }),
                    );
                }
            }
        }
        succeeded
    }

    async fn execute_one(
        &self,
        envelope: IntentEnvelope,
        state: &mut AgentState,
        acks: &mut AckRegistry,
        energy: &EnergyModel,
    ) -> Result<Option<String>> {
        match envelope.intent {
            Intent::UpdateState {
                field,
                value,
                delta,
                from_tool,
            } => {
                if from_tool && field.is_automatic() {
                    return Err(VigilError::AutomaticField {
                        field: field.as_str().to_string(),
                    });
                }
                if delta {
                    state.apply_delta(field, value);
                } else {
                    state.set(field, value);
                }
                Ok(Some(format!("{}={}", field, state.get(field))))
            }

            Intent::SendMessage {
                target,
                text,
                channel,
                options,
            } => {
                let name = channel.unwrap_or_else(|| self.default_channel.clone());
                let receipt = self.send_with_retry(&name, &target, &text, &options).await?;
                state.on_message_sent(energy);
                self.metrics.incr(counters::MESSAGES_SENT);
                Ok(receipt.message_id)
            }

            Intent::Schedule {
                fire_at,
                recurrence,
                timezone,
                payload,
            } => {
                let id = self.scheduler.schedule(ScheduleRequest {
                    fire_at,
                    recurrence,
                    timezone,
                    payload,
                    plugin_id: None,
                })?;
                Ok(Some(id.to_string()))
            }

            Intent::CallTool { tool, args } => {
                let output = self.tools.execute(&tool, args).await?;
                Ok(Some(output.content.to_string()))
            }

            Intent::Defer {
                signal_type,
                source,
                hours,
                value_at_ack,
                override_delta,
                reason,
            } => {
                let until = acks.register_deferred(
                    signal_type,
                    source,
                    hours,
                    value_at_ack,
                    override_delta,
                    reason,
                    chrono::Utc::now(),
                );
                Ok(Some(format!("deferred until {}", until)))
            }

            Intent::Suppress {
                signal_type,
                reason,
            } => {
                acks.register_suppressed(signal_type, None, reason, chrono::Utc::now());
                Ok(None)
            }
        }
    }

    /// Send through the channel breaker with bounded retry and jittered
    /// exponential backoff. Non-retryable errors short-circuit.
    async fn send_with_retry(
        &self,
        channel_name: &str,
        target: &str,
        text: &str,
        options: &crate::agent::intent::MessageOptions,
    ) -> Result<crate::port::channel::SendReceipt> {
        let channel = self
            .channels
            .get(channel_name)
            .ok_or_else(|| VigilError::ChannelUnavailable {
                name: channel_name.to_string(),
            })?;
        let breaker = self
            .breakers
            .get(channel_name)
            .ok_or_else(|| VigilError::Internal {
                message: format!("no breaker for channel {}", channel_name),
            })?;

        let mut attempt = 0;
        loop {
            let result = breaker
                .execute(|| channel.send_message(target, text, options))
                .await;

            match result {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    // CircuitOpen and protocol errors are not retried here
                    if !e.is_retryable() || attempt >= self.config.send_retries {
                        return Err(e);
                    }
                    attempt += 1;
                    self.metrics.incr(counters::SEND_RETRIES);
                    let base = self.config.retry_base_delay_ms * 2u64.pow(attempt - 1);
                    let jitter = rand::thread_rng().gen_range(0..=base / 2);
                    // Providers that named a retry-after win over our backoff
                    let delay = match &e {
                        VigilError::RateLimited {
                            retry_after: Some(d),
                        } => *d,
                        _ => Duration::from_millis(base + jitter),
                    };
                    tracing::debug!(
                        channel = channel_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying send"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::intent::MessageOptions;
    use crate::agent::state::StateField;
    use crate::breaker::BreakerStatus;
    use crate::port::channel::SendReceipt;
    use crate::signal::ack::AckConfig;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Channel that fails a scripted number of times, then succeeds
    struct FlakyChannel {
        failures_left: Mutex<u32>,
        calls: Mutex<u32>,
        retryable: bool,
    }

    impl FlakyChannel {
        fn failing(times: u32, retryable: bool) -> Self {
            Self {
                failures_left: Mutex::new(times),
                calls: Mutex::new(0),
                retryable,
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl Channel for FlakyChannel {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn send_message(
            &self,
            _target: &str,
            _text: &str,
            _options: &MessageOptions,
        ) -> Result<SendReceipt> {
            *self.calls.lock() += 1;
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                if self.retryable {
                    return Err(VigilError::ConnectionFailed {
                        message: "flaky".to_string(),
                    });
                }
                return Err(VigilError::InvalidTarget {
                    target: "nope".to_string(),
                });
            }
            Ok(SendReceipt {
                message_id: Some("msg-1".to_string()),
            })
        }
    }

    fn motor_with(channel: Arc<dyn Channel>) -> Motor {
        let config = MotorConfig {
            retry_base_delay_ms: 1,
            ..Default::default()
        };
        let mut motor = Motor::new(
            config,
            ToolRegistry::new(),
            SchedulerHandle::in_memory(),
            Metrics::new(),
        );
        motor.register_channel(channel);
        motor
    }

    fn send_intent() -> Vec<IntentEnvelope> {
        vec![IntentEnvelope::new(Intent::SendMessage {
            target: "42".to_string(),
            text: "hello".to_string(),
            channel: None,
            options: MessageOptions::default(),
        })]
    }

    fn fixtures() -> (AgentState, AckRegistry, EnergyModel, SignalBus) {
        (
            AgentState::default(),
            AckRegistry::new(AckConfig::default(), Metrics::new()),
            EnergyModel::default(),
            SignalBus::with_default_capacity(Metrics::new()),
        )
    }

    #[tokio::test]
    async fn retry_then_succeed_keeps_breaker_closed() {
        let channel = Arc::new(FlakyChannel::failing(2, true));
        let motor = motor_with(channel.clone());
        let (mut state, mut acks, energy, bus) = fixtures();
        state.social_debt = 0.5;

        let ok = motor
            .execute_all(
                send_intent(),
                &mut state,
                &mut acks,
                &energy,
                &bus,
                Uuid::new_v4(),
            )
            .await;

        assert_eq!(ok, 1);
        assert_eq!(channel.calls(), 3);
        assert_eq!(
            motor.breaker_stats("flaky").unwrap().status,
            BreakerStatus::Closed
        );
        // Social debt relieved on actual delivery
        assert!(state.social_debt < 0.5);
        // No deferral was registered
        assert!(acks.is_empty());
    }

    #[tokio::test]
    async fn persistent_failure_opens_the_breaker() {
        let channel = Arc::new(FlakyChannel::failing(99, true));
        let motor = motor_with(channel.clone());
        let (mut state, mut acks, energy, bus) = fixtures();

        let ok = motor
            .execute_all(
                send_intent(),
                &mut state,
                &mut acks,
                &energy,
                &bus,
                Uuid::new_v4(),
            )
            .await;

        assert_eq!(ok, 0);
        // 1 + 2 retries = 3 attempts = breaker max failures
        assert_eq!(channel.calls(), 3);
        assert_eq!(
            motor.breaker_stats("flaky").unwrap().status,
            BreakerStatus::Open
        );

        // Next send fails fast without touching the channel
        let ok = motor
            .execute_all(
                send_intent(),
                &mut state,
                &mut acks,
                &energy,
                &bus,
                Uuid::new_v4(),
            )
            .await;
        assert_eq!(ok, 0);
        assert_eq!(channel.calls(), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_short_circuits() {
        let channel = Arc::new(FlakyChannel::failing(99, false));
        let motor = motor_with(channel.clone());
        let (mut state, mut acks, energy, bus) = fixtures();

        motor
            .execute_all(
                send_intent(),
                &mut state,
                &mut acks,
                &energy,
                &bus,
                Uuid::new_v4(),
            )
            .await;
        assert_eq!(channel.calls(), 1);
    }

    #[tokio::test]
    async fn update_state_clamps_and_rounds() {
        let motor = motor_with(Arc::new(FlakyChannel::failing(0, true)));
        let (mut state, mut acks, energy, bus) = fixtures();

        let intents = vec![IntentEnvelope::new(Intent::UpdateState {
            field: StateField::Curiosity,
            value: 0.123456,
            delta: false,
            from_tool: true,
        })];
        motor
            .execute_all(intents, &mut state, &mut acks, &energy, &bus, Uuid::new_v4())
            .await;
        assert_eq!(state.curiosity, 0.123);
    }

    #[tokio::test]
    async fn tool_cannot_touch_automatic_fields() {
        let motor = motor_with(Arc::new(FlakyChannel::failing(0, true)));
        let metrics = motor.metrics.clone();
        let (mut state, mut acks, energy, bus) = fixtures();
        let before = state.energy;

        let intents = vec![IntentEnvelope::new(Intent::UpdateState {
            field: StateField::Energy,
            value: 1.0,
            delta: false,
            from_tool: true,
        })];
        let ok = motor
            .execute_all(intents, &mut state, &mut acks, &energy, &bus, Uuid::new_v4())
            .await;

        assert_eq!(ok, 0);
        assert_eq!(state.energy, before);
        assert_eq!(metrics.get(counters::INTENT_REJECTED), 1);

        // A failure motor_result landed on the bus
        let drained = bus.drain(10);
        assert!(drained.iter().any(|s| {
            matches!(
                &s.payload,
                Some(SignalPayload::MotorResult { success: false, .. })
            )
        }));
    }

    #[tokio::test]
    async fn core_may_update_automatic_fields() {
        let motor = motor_with(Arc::new(FlakyChannel::failing(0, true)));
        let (mut state, mut acks, energy, bus) = fixtures();

        let intents = vec![IntentEnvelope::new(Intent::UpdateState {
            field: StateField::Energy,
            value: 0.25,
            delta: false,
            from_tool: false,
        })];
        let ok = motor
            .execute_all(intents, &mut state, &mut acks, &energy, &bus, Uuid::new_v4())
            .await;
        assert_eq!(ok, 1);
        assert_eq!(state.energy, 0.25);
    }

    #[tokio::test]
    async fn defer_intent_registers_ack() {
        let motor = motor_with(Arc::new(FlakyChannel::failing(0, true)));
        let (mut state, mut acks, energy, bus) = fixtures();

        let intents = vec![IntentEnvelope::new(Intent::Defer {
            signal_type: SignalType::ContactUrge,
            source: None,
            hours: 4.0,
            value_at_ack: Some(0.4),
            override_delta: Some(0.25),
            reason: "tested".to_string(),
        })];
        motor
            .execute_all(intents, &mut state, &mut acks, &energy, &bus, Uuid::new_v4())
            .await;
        assert_eq!(acks.len(), 1);
    }

    #[tokio::test]
    async fn schedule_intent_lands_in_the_book() {
        let motor = motor_with(Arc::new(FlakyChannel::failing(0, true)));
        let (mut state, mut acks, energy, bus) = fixtures();

        let intents = vec![IntentEnvelope::new(Intent::Schedule {
            fire_at: chrono::Utc::now() + chrono::Duration::hours(1),
            recurrence: None,
            timezone: None,
            payload: serde_json::json!({"kind": "reminder"}),
        })];
        let ok = motor
            .execute_all(intents, &mut state, &mut acks, &energy, &bus, Uuid::new_v4())
            .await;
        assert_eq!(ok, 1);
        assert_eq!(motor.scheduler.get_schedules().len(), 1);
    }
}
