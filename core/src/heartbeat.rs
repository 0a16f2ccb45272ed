//! Heartbeat scheduler
//!
//! The main loop. Each tick advances the state machine, runs the four
//! stages in order, and schedules the next tick after the freshly computed
//! interval. A tick is atomic with respect to the agent state; cognition
//! turns run as their own task and hand intents back through a queue.

use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::energy::{DrainKind, EnergyModel};
use crate::agent::identity::{AgentIdentity, UserModel};
use crate::agent::state::{AgentState, TickBounds};
use crate::error::Result;
use crate::metrics::{counters, Metrics};
use crate::pipeline::{Aggregation, Autonomic, Cognition, IntentQueue, Motor, WakeDecision};
use crate::signal::ack::AckRegistry;
use crate::signal::bus::SignalBus;
use crate::signal::{Priority, Signal, SignalPayload, SignalType};

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub tick_bounds: TickBounds,
    /// Social debt accumulated per tick
    pub social_debt_rate: f64,
    /// Bus drain cap per tick
    pub drain_max: usize,
    /// How strongly surviving signals disturb a resting agent
    pub disturbance_gain: f64,
    /// Deadline for one cognition turn
    pub turn_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            tick_bounds: TickBounds::default(),
            social_debt_rate: 0.004,
            drain_max: 256,
            disturbance_gain: 0.3,
            turn_timeout: Duration::from_secs(120),
        }
    }
}

pub struct Heartbeat {
    config: HeartbeatConfig,
    state: AgentState,
    identity: AgentIdentity,
    user: UserModel,
    energy_model: EnergyModel,
    bus: SignalBus,
    autonomic: Autonomic,
    aggregation: Aggregation,
    acks: AckRegistry,
    cognition: Arc<Cognition>,
    intents: IntentQueue,
    motor: Motor,
    scheduler: crate::schedule::SchedulerHandle,
    metrics: Metrics,
    cancel: CancellationToken,
    /// LLM calls from completed turns, drained into energy next tick
    pending_llm_drains: Arc<AtomicUsize>,
    tick_count: u64,
}

impl Heartbeat {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: HeartbeatConfig,
        state: AgentState,
        identity: AgentIdentity,
        user: UserModel,
        energy_model: EnergyModel,
        bus: SignalBus,
        autonomic: Autonomic,
        aggregation: Aggregation,
        acks: AckRegistry,
        cognition: Arc<Cognition>,
        motor: Motor,
        scheduler: crate::schedule::SchedulerHandle,
        metrics: Metrics,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            identity,
            user,
            energy_model,
            bus,
            autonomic,
            aggregation,
            acks,
            cognition,
            intents: IntentQueue::new(),
            motor,
            scheduler,
            metrics,
            cancel,
            pending_llm_drains: Arc::new(AtomicUsize::new(0)),
            tick_count: 0,
        }
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    pub fn cognition(&self) -> &Arc<Cognition> {
        &self.cognition
    }

    pub fn motor(&self) -> &Motor {
        &self.motor
    }

    /// Run until cancelled. Finishes the tick in flight, stops ports,
    /// flushes metrics.
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!(agent = %self.identity.name, "heartbeat starting");
        self.motor.start_channels().await;

        loop {
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "tick failed");
            }

            let interval = self.state.tick_interval;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        tracing::info!("heartbeat stopping");
        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        // Let an in-flight turn finish or hit its own deadline
        let deadline = tokio::time::Instant::now() + self.config.turn_timeout;
        while self.cognition.is_active() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.motor.stop_channels().await;
        self.metrics.flush();
    }

    /// One atomic tick.
    pub async fn tick(&mut self) -> Result<()> {
        let now = Utc::now();
        let correlation_id = Uuid::new_v4();
        self.tick_count += 1;
        self.metrics.incr(counters::TICKS);

        // 1. Advance the state machine
        let local_hour = self.user.local_hour(now);
        let night = self.user.is_night(now);
        self.state.advance_tick(
            &self.energy_model,
            self.config.social_debt_rate,
            local_hour,
            now,
        );
        for _ in 0..self.pending_llm_drains.swap(0, Ordering::SeqCst) {
            self.state.energy = self.energy_model.drain(self.state.energy, DrainKind::LlmCall);
        }
        let pressure = self.state.reach_out_pressure(&self.identity.traits);
        self.state.recompute_alertness(pressure, night);

        // 2. AUTONOMIC: neurons and filters feed the bus
        self.autonomic.run(
            &self.state,
            &self.identity,
            &self.user,
            correlation_id,
            now,
            &self.bus,
        );

        // 3. Fire due schedules back into the pipeline
        for entry in self.scheduler.due(now) {
            self.metrics.incr(counters::SCHEDULES_FIRED);
            let plugin_id = entry.plugin_id.clone().unwrap_or_else(|| "core".to_string());
            let _ = self.bus.push(
                Signal::new(
                    SignalType::PluginEvent,
                    format!("plugin.{}", plugin_id),
                    correlation_id,
                    now,
                )
                .with_priority(Priority::Normal)
                .with_value(0.5)
                .with_payload(SignalPayload::PluginEvent {
                    plugin_id,
                    event: entry.payload,
                }),
            );
        }

        // 4. AGGREGATION over the drained bus
        let drained = self.bus.drain(self.config.drain_max);
        let decision =
            self.aggregation
                .run(drained, &mut self.acks, &self.state, correlation_id, now);
        self.state.pending_thought_count = decision
            .signals
            .iter()
            .filter(|s| s.signal_type == SignalType::Thought)
            .count();

        // Positive reactions from the user recharge the agent
        for signal in &decision.signals {
            if signal.signal_type == SignalType::MessageReaction {
                self.state.on_positive_feedback(&self.energy_model);
            }
        }

        // 5. Resting agents take surviving events as disturbance
        if self.state.sleep.mode.is_resting() {
            for signal in &decision.signals {
                if matches!(signal.priority, Priority::High | Priority::Normal) {
                    let amount = signal.metrics.value
                        * signal.metrics.confidence
                        * self.config.disturbance_gain;
                    if self.state.add_disturbance(amount) {
                        break;
                    }
                }
            }
        }

        // 6. COGNITION, unless a turn is still running
        if decision.should_wake || self.cognition.has_pending_escalation() {
            self.state.energy = self
                .energy_model
                .drain(self.state.energy, DrainKind::EventProcessed);
            self.dispatch_cognition(decision, correlation_id);
        }

        // 7. MOTOR drains whatever cognition has queued so far
        let intents = self.intents.drain_all();
        if !intents.is_empty() {
            self.motor
                .execute_all(
                    intents,
                    &mut self.state,
                    &mut self.acks,
                    &self.energy_model,
                    &self.bus,
                    correlation_id,
                )
                .await;
        }

        // 8. Pace the next tick
        let pressure = self.state.reach_out_pressure(&self.identity.traits);
        self.state
            .recompute_tick_interval(&self.config.tick_bounds, pressure, &self.energy_model);

        tracing::trace!(
            tick = self.tick_count,
            interval_ms = self.state.tick_interval.as_millis() as u64,
            mode = ?self.state.sleep.mode,
            energy = self.state.energy,
            "tick complete"
        );
        Ok(())
    }

    /// Spawn a cognition turn, or requeue its thought signals when busy.
    fn dispatch_cognition(&mut self, decision: WakeDecision, correlation_id: Uuid) {
        if !self.cognition.try_begin_turn() {
            self.metrics.incr(counters::COGNITION_SKIPPED_BUSY);
            let thoughts: Vec<Signal> = decision
                .signals
                .into_iter()
                .filter(|s| s.signal_type == SignalType::Thought)
                .collect();
            if !thoughts.is_empty() {
                tracing::debug!(count = thoughts.len(), "cognition busy, requeueing thoughts");
                self.bus.requeue_front(thoughts);
            }
            return;
        }

        let cognition = self.cognition.clone();
        let bus = self.bus.clone();
        let intents = self.intents.clone();
        let metrics = self.metrics.clone();
        let llm_drains = self.pending_llm_drains.clone();
        let state = self.state.clone();
        let identity = self.identity.clone();
        let user = self.user.clone();
        let timeout = self.config.turn_timeout;
        let now = Utc::now();

        tokio::spawn(async move {
            let turn = cognition.run_turn(decision, state, identity, user, correlation_id, now);
            match tokio::time::timeout(timeout, turn).await {
                Ok(Ok(outcome)) => {
                    llm_drains.fetch_add(outcome.llm_calls, Ordering::SeqCst);
                    intents.push_all(outcome.intents);
                    for thought in outcome.thoughts {
                        let _ = bus.push(thought);
                    }
                }
                Ok(Err(e)) => {
                    metrics.incr(counters::COGNITION_FAILED);
                    tracing::warn!(error = %e, "cognition turn failed");
                }
                Err(_) => {
                    metrics.incr(counters::COGNITION_FAILED);
                    tracing::warn!("cognition turn cancelled by deadline");
                }
            }
            cognition.end_turn();
        });
    }
}
