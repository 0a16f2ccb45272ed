//! COGNITION stage
//!
//! Classifies the situation behind a wake decision and produces intents.
//! Owns two reasoning budgets: the fast path is always available, the smart
//! path is rate-limited. Non-reentrant; a turn runs to completion or is
//! cancelled by its deadline before the next one starts.
//!
//! Turn lifecycle:
//!
//! ```text
//! IDLE -> CLASSIFY -> DECIDE -> (FAST | ESCALATE) -> TOOL_LOOP* -> EMIT_INTENTS -> IDLE
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::agent::identity::{AgentIdentity, UserModel};
use crate::agent::intent::{Intent, IntentEnvelope, MessageOptions};
use crate::agent::state::{AgentState, StateField};
use crate::error::{Result, VigilError};
use crate::metrics::{counters, Metrics};
use crate::pipeline::{WakeDecision, WakeReason};
use crate::port::llm::{ChatMessage, ChatRole, Llm, LlmRequest, LlmRole};
use crate::signal::{
    thought_dedupe_key, Priority, Signal, SignalPayload, SignalType,
};
use crate::tool::ToolRegistry;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CognitionConfig {
    /// User-message complexity above this goes straight to the smart path
    pub max_fast_complexity: f64,
    /// Trigger confidence below this escalates
    pub escalation_threshold: f64,
    /// Thought chains deeper than this are rejected
    pub max_thought_depth: u8,
    /// Thoughts cognition may enqueue per turn
    pub max_thoughts_per_tick: usize,
    /// Dedupe window for thought content, seconds
    pub thought_dedupe_window_secs: u64,
    /// Side-effectful tool calls allowed per turn
    pub max_tool_calls_per_turn: usize,
    /// Upper bound on LLM round-trips in one tool loop
    pub max_tool_loop_iterations: usize,
    /// Smart-path completions allowed per rolling hour
    pub smart_calls_per_hour: u32,
}

impl Default for CognitionConfig {
    fn default() -> Self {
        Self {
            max_fast_complexity: 0.5,
            escalation_threshold: 0.6,
            max_thought_depth: 4,
            max_thoughts_per_tick: 3,
            thought_dedupe_window_secs: 600,
            max_tool_calls_per_turn: 3,
            max_tool_loop_iterations: 4,
            smart_calls_per_hour: 12,
        }
    }
}

/// What kind of situation woke us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Situation {
    UserMessage,
    ProactiveContact,
    PatternAnomaly,
    ChannelIssue,
    TimeEvent,
    Thought,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CognitionAction {
    Respond,
    Initiate,
    Escalate,
    None,
}

/// Observable phase of the current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Classify,
    Decide,
    Fast,
    Escalate,
    ToolLoop,
    EmitIntents,
}

/// Everything a completed turn hands back to the heartbeat
#[derive(Debug)]
pub struct TurnOutcome {
    pub situation: Option<Situation>,
    pub action: CognitionAction,
    pub intents: Vec<IntentEnvelope>,
    /// Thought signals to re-enter the bus at NORMAL priority
    pub thoughts: Vec<Signal>,
    pub llm_calls: usize,
}

impl TurnOutcome {
    fn quiet() -> Self {
        Self {
            situation: None,
            action: CognitionAction::None,
            intents: Vec::new(),
            thoughts: Vec::new(),
            llm_calls: 0,
        }
    }
}

/// Mutable scratch for one turn
struct Turn {
    intents: Vec<IntentEnvelope>,
    thoughts: Vec<Signal>,
    llm_calls: usize,
    side_effect_calls: usize,
    correlation_id: Uuid,
    now: DateTime<Utc>,
}

pub struct Cognition {
    llm: Arc<dyn Llm>,
    tools: ToolRegistry,
    config: CognitionConfig,
    metrics: Metrics,
    active: AtomicBool,
    phase: Mutex<TurnPhase>,
    /// A tool asked for the smart path on the next turn
    pending_escalation: AtomicBool,
    /// Recently seen thought dedupe keys with their timestamps
    recent_thoughts: Mutex<VecDeque<(String, DateTime<Utc>)>>,
    /// Smart completions in the rolling hour window
    smart_calls: Mutex<VecDeque<DateTime<Utc>>>,
}

impl Cognition {
    pub fn new(
        llm: Arc<dyn Llm>,
        tools: ToolRegistry,
        config: CognitionConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            llm,
            tools,
            config,
            metrics,
            active: AtomicBool::new(false),
            phase: Mutex::new(TurnPhase::Idle),
            pending_escalation: AtomicBool::new(false),
            recent_thoughts: Mutex::new(VecDeque::new()),
            smart_calls: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &CognitionConfig {
        &self.config
    }

    /// Claim the turn slot. Returns false when a turn is already running.
    pub fn try_begin_turn(&self) -> bool {
        !self.active.swap(true, Ordering::SeqCst)
    }

    /// Release the turn slot. Call exactly once per successful claim.
    pub fn end_turn(&self) {
        *self.phase.lock() = TurnPhase::Idle;
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> TurnPhase {
        *self.phase.lock()
    }

    pub fn has_pending_escalation(&self) -> bool {
        self.pending_escalation.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: TurnPhase) {
        *self.phase.lock() = phase;
    }

    /// One full cognition turn. The caller must hold the turn slot
    /// (`try_begin_turn`) and release it afterwards.
    pub async fn run_turn(
        &self,
        decision: WakeDecision,
        state: AgentState,
        identity: AgentIdentity,
        user: UserModel,
        correlation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome> {
        self.metrics.incr(counters::COGNITION_TURNS);
        self.set_phase(TurnPhase::Classify);

        let Some((situation, trigger)) = self.classify(&decision) else {
            self.set_phase(TurnPhase::EmitIntents);
            return Ok(TurnOutcome::quiet());
        };
        tracing::debug!(situation = ?situation, trigger = %trigger.signal_type, "turn classified");

        self.set_phase(TurnPhase::Decide);
        let mut turn = Turn {
            intents: Vec::new(),
            thoughts: Vec::new(),
            llm_calls: 0,
            side_effect_calls: 0,
            correlation_id,
            now,
        };

        let wants_smart = self.wants_smart(situation, &trigger);
        let smart = wants_smart && self.acquire_smart_budget(now);
        if wants_smart && !smart {
            self.metrics.incr(counters::SMART_BUDGET_DENIED);
        }

        let action = if smart {
            self.set_phase(TurnPhase::Escalate);
            self.metrics.incr(counters::SMART_ESCALATIONS);
            self.smart_turn(situation, &trigger, &state, &identity, &user, &mut turn)
                .await
        } else {
            self.set_phase(TurnPhase::Fast);
            self.fast_turn(situation, &trigger, &state, &identity, &user, &mut turn)
                .await
        };

        self.set_phase(TurnPhase::EmitIntents);
        Ok(TurnOutcome {
            situation: Some(situation),
            action,
            intents: turn.intents,
            thoughts: turn.thoughts,
            llm_calls: turn.llm_calls,
        })
    }

    // ------------------------------------------------------------------
    // CLASSIFY
    // ------------------------------------------------------------------

    /// Deterministic rule-based situation classifier. Picks the trigger
    /// signal along with the situation it implies.
    fn classify(&self, decision: &WakeDecision) -> Option<(Situation, Signal)> {
        let signals = &decision.signals;

        if let Some(s) = signals
            .iter()
            .find(|s| s.signal_type == SignalType::UserMessage)
        {
            return Some((Situation::UserMessage, s.clone()));
        }

        if let Some(s) = signals.iter().find(|s| {
            s.signal_type == SignalType::MotorResult
                && matches!(
                    &s.payload,
                    Some(SignalPayload::MotorResult { success: false, .. })
                )
        }) {
            return Some((Situation::ChannelIssue, s.clone()));
        }

        if let Some(s) = signals
            .iter()
            .find(|s| s.signal_type == SignalType::Thought)
        {
            return Some((Situation::Thought, s.clone()));
        }

        if let Some(s) = signals.iter().find(|s| {
            matches!(
                s.signal_type,
                SignalType::PatternBreak | SignalType::ThresholdCrossed
            )
        }) {
            return Some((Situation::PatternAnomaly, s.clone()));
        }

        if let Some(s) = signals.iter().find(|s| {
            s.signal_type == SignalType::ContactUrge
                || (decision.reason == Some(WakeReason::ContactPressure)
                    && s.signal_type == SignalType::ContactPressure)
        }) {
            return Some((Situation::ProactiveContact, s.clone()));
        }

        if let Some(s) = signals.iter().find(|s| {
            matches!(
                s.signal_type,
                SignalType::HourChanged | SignalType::TimeOfDay | SignalType::PluginEvent
            )
        }) {
            return Some((Situation::TimeEvent, s.clone()));
        }

        None
    }

    // ------------------------------------------------------------------
    // DECIDE
    // ------------------------------------------------------------------

    fn wants_smart(&self, situation: Situation, trigger: &Signal) -> bool {
        if self.pending_escalation.swap(false, Ordering::SeqCst) {
            return true;
        }
        match situation {
            // Quality matters for unprompted outreach
            Situation::ProactiveContact => true,
            Situation::UserMessage => {
                let complexity = trigger
                    .payload
                    .as_ref()
                    .and_then(|p| match p {
                        SignalPayload::UserMessage { text, .. } => Some(complexity_score(text)),
                        _ => None,
                    })
                    .unwrap_or(0.0);
                complexity > self.config.max_fast_complexity
                    || trigger.metrics.confidence < self.config.escalation_threshold
            }
            _ => trigger.metrics.confidence < self.config.escalation_threshold,
        }
    }

    /// Smart budget: completions per rolling hour
    fn acquire_smart_budget(&self, now: DateTime<Utc>) -> bool {
        let mut calls = self.smart_calls.lock();
        let cutoff = now - ChronoDuration::hours(1);
        while calls.front().is_some_and(|at| *at < cutoff) {
            calls.pop_front();
        }
        if calls.len() as u32 >= self.config.smart_calls_per_hour {
            return false;
        }
        calls.push_back(now);
        true
    }

    // ------------------------------------------------------------------
    // FAST path
    // ------------------------------------------------------------------

    async fn fast_turn(
        &self,
        situation: Situation,
        trigger: &Signal,
        _state: &AgentState,
        identity: &AgentIdentity,
        _user: &UserModel,
        turn: &mut Turn,
    ) -> CognitionAction {
        match situation {
            Situation::UserMessage => {
                let Some((chat_id, text)) = user_message_parts(trigger) else {
                    self.metrics.incr(counters::COGNITION_FAILED);
                    return CognitionAction::None;
                };
                let request = LlmRequest::new(
                    LlmRole::Fast,
                    vec![
                        ChatMessage::system(persona_prompt(identity)),
                        ChatMessage::user(text),
                    ],
                );
                turn.llm_calls += 1;
                match self.llm.complete(request).await {
                    Ok(response) if !response.content.trim().is_empty() => {
                        let reply = send_message_intent(
                            chat_id,
                            response.content,
                            trigger,
                            turn.correlation_id,
                        );
                        turn.intents.push(reply);
                        CognitionAction::Respond
                    }
                    Ok(_) | Err(_) => {
                        // Classifier failures emit no intent
                        self.metrics.incr(counters::COGNITION_FAILED);
                        CognitionAction::None
                    }
                }
            }

            Situation::Thought => {
                // Work the thought off and maybe continue the chain
                turn.intents.push(
                    IntentEnvelope::new(Intent::UpdateState {
                        field: StateField::ThoughtPressure,
                        value: -0.1,
                        delta: true,
                        from_tool: false,
                    })
                    .with_trace(turn.correlation_id, Some(trigger.id)),
                );

                let Some(SignalPayload::Thought { content, .. }) = &trigger.payload else {
                    return CognitionAction::None;
                };
                let request = LlmRequest::new(
                    LlmRole::Fast,
                    vec![
                        ChatMessage::system(persona_prompt(identity)),
                        ChatMessage::user(format!("Continue this line of thought briefly, or reply with nothing if it is finished: {}", content)),
                    ],
                );
                turn.llm_calls += 1;
                if let Ok(response) = self.llm.complete(request).await {
                    let followup = response.content.trim();
                    if !followup.is_empty() {
                        self.push_thought(trigger, followup.to_string(), turn);
                    }
                }
                CognitionAction::None
            }

            Situation::PatternAnomaly => {
                // A root thought about the anomaly; no outward action yet
                let content = match &trigger.payload {
                    Some(SignalPayload::Pattern { name, reason, .. }) => {
                        format!("noticed {}: {}", name, reason)
                    }
                    _ => format!(
                        "noticed {} moved to {:.2}",
                        trigger.signal_type, trigger.metrics.value
                    ),
                };
                self.push_thought(trigger, content, turn);
                CognitionAction::None
            }

            Situation::ChannelIssue => {
                tracing::warn!(source = %trigger.source, "channel issue observed");
                CognitionAction::None
            }

            Situation::TimeEvent => CognitionAction::None,

            // Smart was denied; try again later rather than send a cheap
            // proactive message
            Situation::ProactiveContact => {
                turn.intents.push(
                    IntentEnvelope::new(Intent::Defer {
                        signal_type: SignalType::ContactUrge,
                        source: None,
                        hours: 1.0,
                        value_at_ack: Some(trigger.metrics.value),
                        override_delta: None,
                        reason: "smart budget unavailable".to_string(),
                    })
                    .with_trace(turn.correlation_id, Some(trigger.id)),
                );
                CognitionAction::None
            }
        }
    }

    // ------------------------------------------------------------------
    // ESCALATE / TOOL_LOOP
    // ------------------------------------------------------------------

    async fn smart_turn(
        &self,
        situation: Situation,
        trigger: &Signal,
        state: &AgentState,
        identity: &AgentIdentity,
        user: &UserModel,
        turn: &mut Turn,
    ) -> CognitionAction {
        let target = match situation {
            Situation::UserMessage => user_message_parts(trigger).map(|(chat_id, _)| chat_id),
            _ => user.chat_id.clone(),
        };

        let mut messages = vec![
            ChatMessage::system(persona_prompt(identity)),
            ChatMessage::user(situation_prompt(situation, trigger, state)),
        ];

        let specs = self.tools.specs();
        let content = loop {
            if turn.llm_calls >= self.config.max_tool_loop_iterations {
                self.metrics.incr(counters::TOOL_CALLS_CAPPED);
                break None;
            }

            let request = LlmRequest::new(LlmRole::Smart, messages.clone())
                .with_tools(specs.clone());
            turn.llm_calls += 1;
            let response = match self.llm.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(error = %e, "smart path failed, downgrading");
                    self.metrics.incr(counters::COGNITION_FAILED);
                    return self.downgrade(situation, trigger, &target, turn);
                }
            };

            if response.tool_calls.is_empty() {
                break Some(response.content);
            }

            self.set_phase(TurnPhase::ToolLoop);
            messages.push(ChatMessage::assistant(response.content.clone()));
            for call in response.tool_calls {
                // The loop may ask to re-enter on the smart path next tick
                if call.name == "core.escalate" {
                    self.pending_escalation.store(true, Ordering::SeqCst);
                    continue;
                }

                if self.tools.has_side_effects(&call.name) {
                    if turn.side_effect_calls >= self.config.max_tool_calls_per_turn {
                        self.metrics.incr(counters::TOOL_CALLS_CAPPED);
                        messages.push(tool_message(&call.name, "call budget exhausted"));
                        continue;
                    }
                    turn.side_effect_calls += 1;
                }

                match self.tools.execute(&call.name, call.arguments).await {
                    Ok(output) => {
                        if output.escalate_to_smart {
                            self.pending_escalation.store(true, Ordering::SeqCst);
                        }
                        if let Some(thought) =
                            output.content.get("thought").and_then(|v| v.as_str())
                        {
                            self.push_thought(trigger, thought.to_string(), turn);
                        }
                        messages.push(tool_message(&call.name, &output.content.to_string()));
                    }
                    Err(e) => {
                        // Honest failure surfaces to the user
                        if let Some(target) = &target {
                            let apology = send_message_intent(
                                target.clone(),
                                e.user_message(),
                                trigger,
                                turn.correlation_id,
                            );
                            turn.intents.push(apology);
                        }
                        messages.push(tool_message(&call.name, &format!("error: {}", e)));
                    }
                }
            }
        };

        match content {
            Some(text) if !text.trim().is_empty() => {
                let Some(target) = target else {
                    tracing::warn!("no message target for situation {:?}", situation);
                    return CognitionAction::None;
                };
                let reply = send_message_intent(target, text, trigger, turn.correlation_id);
                turn.intents.push(reply);
                if situation == Situation::ProactiveContact {
                    // Cool the urge down so the next tick does not re-initiate
                    turn.intents.push(
                        IntentEnvelope::new(Intent::Defer {
                            signal_type: SignalType::ContactUrge,
                            source: None,
                            hours: 2.0,
                            value_at_ack: Some(trigger.metrics.value),
                            override_delta: None,
                            reason: "just reached out".to_string(),
                        })
                        .with_trace(turn.correlation_id, Some(trigger.id)),
                    );
                    CognitionAction::Initiate
                } else {
                    CognitionAction::Respond
                }
            }
            _ => self.downgrade(situation, trigger, &target, turn),
        }
    }

    /// Smart-path failure falls back to a fast acknowledgment
    fn downgrade(
        &self,
        situation: Situation,
        trigger: &Signal,
        target: &Option<String>,
        turn: &mut Turn,
    ) -> CognitionAction {
        match situation {
            Situation::UserMessage => {
                if let Some(target) = target {
                    let ack = send_message_intent(
                        target.clone(),
                        "Got your message - I need a moment to think it over properly.".to_string(),
                        trigger,
                        turn.correlation_id,
                    );
                    turn.intents.push(ack);
                    return CognitionAction::Respond;
                }
                CognitionAction::None
            }
            // Never send a degraded proactive message; retry later instead
            _ => {
                turn.intents.push(
                    IntentEnvelope::new(Intent::Defer {
                        signal_type: SignalType::ContactUrge,
                        source: None,
                        hours: 1.0,
                        value_at_ack: Some(trigger.metrics.value),
                        override_delta: None,
                        reason: "smart path failed".to_string(),
                    })
                    .with_trace(turn.correlation_id, Some(trigger.id)),
                );
                CognitionAction::None
            }
        }
    }

    // ------------------------------------------------------------------
    // Thought bookkeeping
    // ------------------------------------------------------------------

    /// Derive and enqueue a thought from its triggering signal, enforcing
    /// depth, per-turn budget, and the dedupe window. Rejections are silent
    /// with a counter.
    fn push_thought(&self, trigger: &Signal, content: String, turn: &mut Turn) {
        match self.make_thought(trigger, content, turn.correlation_id, turn.now) {
            Ok(signal) => {
                if turn.thoughts.len() >= self.config.max_thoughts_per_tick {
                    self.metrics.incr(counters::THOUGHT_DROPPED_BUDGET);
                    return;
                }
                turn.thoughts.push(signal);
            }
            Err(e) if e.is_silent() => {}
            Err(e) => {
                tracing::debug!(error = %e, "thought rejected");
            }
        }
    }

    /// Build a thought signal. Depth is derived from the trigger, never
    /// supplied by the caller: thought triggers increment, everything else
    /// roots at zero.
    pub(crate) fn make_thought(
        &self,
        trigger: &Signal,
        content: String,
        correlation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Signal> {
        let depth = match trigger.thought_depth() {
            Some(parent_depth) => parent_depth.saturating_add(1),
            None => 0,
        };
        if depth > self.config.max_thought_depth {
            self.metrics.incr(counters::THOUGHT_DROPPED_DEPTH);
            return Err(VigilError::MaxThoughtDepth {
                depth,
                max: self.config.max_thought_depth,
            });
        }

        let key = thought_dedupe_key(&content);
        {
            let mut recent = self.recent_thoughts.lock();
            let cutoff = now - ChronoDuration::seconds(self.config.thought_dedupe_window_secs as i64);
            while recent.front().is_some_and(|(_, at)| *at < cutoff) {
                recent.pop_front();
            }
            if recent.iter().any(|(k, _)| *k == key) {
                self.metrics.incr(counters::THOUGHT_DROPPED_DUPLICATE);
                return Err(VigilError::BudgetExhausted {
                    what: "duplicate thought".to_string(),
                });
            }
            recent.push_back((key.clone(), now));
        }

        Ok(Signal::new(
            SignalType::Thought,
            "cognition.thought",
            correlation_id,
            now,
        )
        .with_priority(Priority::Normal)
        .with_value((depth as f64 / self.config.max_thought_depth.max(1) as f64).min(1.0))
        .with_payload(SignalPayload::Thought {
            content,
            depth,
            dedupe_key: key,
        }))
    }

}

// ----------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------

fn send_message_intent(
    target: String,
    text: String,
    trigger: &Signal,
    correlation_id: Uuid,
) -> IntentEnvelope {
    IntentEnvelope::new(Intent::SendMessage {
        target,
        text,
        channel: None,
        options: MessageOptions::default(),
    })
    .with_trace(correlation_id, Some(trigger.id))
}

fn user_message_parts(trigger: &Signal) -> Option<(String, String)> {
    match &trigger.payload {
        Some(SignalPayload::UserMessage { chat_id, text, .. }) => {
            Some((chat_id.clone(), text.clone()))
        }
        _ => None,
    }
}

fn tool_message(name: &str, content: &str) -> ChatMessage {
    ChatMessage {
        role: ChatRole::Tool,
        content: format!("[{}] {}", name, content),
    }
}

/// Rough complexity score in [0, 1] for inbound text
fn complexity_score(text: &str) -> f64 {
    let length = (text.len() as f64 / 400.0).min(0.6);
    let questions = (text.matches('?').count() as f64 * 0.15).min(0.3);
    let code = if text.contains("```") { 0.3 } else { 0.0 };
    (length + questions + code).min(1.0)
}

fn persona_prompt(identity: &AgentIdentity) -> String {
    let mut prompt = format!("You are {}.", identity.name);
    if !identity.values.is_empty() {
        prompt.push_str(&format!(" You value {}.", identity.values.join(", ")));
    }
    if !identity.boundaries.is_empty() {
        prompt.push_str(&format!(" You never {}.", identity.boundaries.join("; ")));
    }
    prompt.push_str(" Keep replies short and natural.");
    prompt
}

fn situation_prompt(situation: Situation, trigger: &Signal, state: &AgentState) -> String {
    let state_line = format!(
        "Internal state: energy {:.2}, social debt {:.2}, curiosity {:.2}.",
        state.energy, state.social_debt, state.curiosity
    );
    match situation {
        Situation::UserMessage => match &trigger.payload {
            Some(SignalPayload::UserMessage { text, .. }) => {
                format!("{}\nThe user wrote: {}", state_line, text)
            }
            _ => state_line,
        },
        Situation::ProactiveContact => format!(
            "{}\nYou feel like reaching out (pressure {:.2}). Write one brief, warm message worth sending unprompted, or reply with nothing.",
            state_line, trigger.metrics.value
        ),
        _ => format!(
            "{}\nSomething changed: {} from {}.",
            state_line, trigger.signal_type, trigger.source
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::llm::{FinishReason, LlmResponse, LlmToolCall, ScriptedLlm};
    use crate::tool::{Tool, ToolOutput};
    use async_trait::async_trait;
    use serde_json::json;

    fn user_message_signal(text: &str) -> Signal {
        Signal::new(
            SignalType::UserMessage,
            "sense.console",
            Uuid::new_v4(),
            Utc::now(),
        )
        .with_priority(Priority::High)
        .with_value(1.0)
        .with_payload(SignalPayload::UserMessage {
            chat_id: "42".to_string(),
            text: text.to_string(),
            user_id: None,
            message_id: None,
        })
    }

    fn decision_for(signal: Signal, reason: WakeReason) -> WakeDecision {
        WakeDecision {
            should_wake: true,
            reason: Some(reason),
            signals: vec![signal],
        }
    }

    fn cognition_with(llm: Arc<dyn Llm>) -> Cognition {
        Cognition::new(
            llm,
            ToolRegistry::new(),
            CognitionConfig::default(),
            Metrics::new(),
        )
    }

    fn response(content: &str) -> LlmResponse {
        LlmResponse {
            content: content.to_string(),
            model: "scripted".to_string(),
            usage: None,
            finish_reason: FinishReason::Stop,
            tool_calls: Vec::new(),
        }
    }

    async fn run(cog: &Cognition, decision: WakeDecision) -> TurnOutcome {
        cog.run_turn(
            decision,
            AgentState::default(),
            AgentIdentity::default(),
            UserModel {
                chat_id: Some("42".to_string()),
                ..Default::default()
            },
            Uuid::new_v4(),
            Utc::now(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn simple_user_message_takes_the_fast_path() {
        let llm = Arc::new(ScriptedLlm::always("hey there"));
        let cog = cognition_with(llm.clone());

        let outcome = run(
            &cog,
            decision_for(user_message_signal("hello"), WakeReason::UserMessage),
        )
        .await;

        assert_eq!(outcome.situation, Some(Situation::UserMessage));
        assert_eq!(outcome.action, CognitionAction::Respond);
        assert_eq!(outcome.intents.len(), 1);
        match &outcome.intents[0].intent {
            Intent::SendMessage { target, text, .. } => {
                assert_eq!(target, "42");
                assert_eq!(text, "hey there");
            }
            other => panic!("unexpected intent: {:?}", other),
        }
        assert_eq!(llm.calls()[0].role, LlmRole::Fast);
    }

    #[tokio::test]
    async fn complex_user_message_escalates_to_smart() {
        let llm = Arc::new(ScriptedLlm::always("thoughtful answer"));
        let cog = cognition_with(llm.clone());

        let long = "Can you help? What should I do about this? Why?\n```rust\nfn main() {}\n```"
            .repeat(4);
        let outcome = run(
            &cog,
            decision_for(user_message_signal(&long), WakeReason::UserMessage),
        )
        .await;

        assert_eq!(outcome.action, CognitionAction::Respond);
        assert_eq!(llm.calls()[0].role, LlmRole::Smart);
    }

    #[tokio::test]
    async fn smart_failure_downgrades_to_honest_ack() {
        let llm = Arc::new(ScriptedLlm::new(vec![Err(VigilError::ProviderError {
            status: 500,
            message: "overloaded".to_string(),
        })]));
        let cog = cognition_with(llm);

        let long = "?".repeat(10) + &"x".repeat(500);
        let outcome = run(
            &cog,
            decision_for(user_message_signal(&long), WakeReason::UserMessage),
        )
        .await;

        // Fast acknowledgment still answers the user
        assert_eq!(outcome.action, CognitionAction::Respond);
        assert_eq!(outcome.intents.len(), 1);
        match &outcome.intents[0].intent {
            Intent::SendMessage { text, .. } => assert!(!text.is_empty()),
            other => panic!("unexpected intent: {:?}", other),
        }
    }

    #[tokio::test]
    async fn proactive_contact_uses_smart_and_cools_down() {
        let llm = Arc::new(ScriptedLlm::always("thinking of you - how did the talk go?"));
        let cog = cognition_with(llm.clone());

        let urge = Signal::new(
            SignalType::ContactUrge,
            "neuron.contact_urge",
            Uuid::new_v4(),
            Utc::now(),
        )
        .with_value(0.7)
        .with_confidence(0.9);

        let outcome = run(&cog, decision_for(urge, WakeReason::ContactPressure)).await;

        assert_eq!(outcome.situation, Some(Situation::ProactiveContact));
        assert_eq!(outcome.action, CognitionAction::Initiate);
        assert_eq!(llm.calls()[0].role, LlmRole::Smart);

        let kinds: Vec<&str> = outcome.intents.iter().map(|i| i.intent.kind()).collect();
        assert!(kinds.contains(&"send_message"));
        assert!(kinds.contains(&"defer"));
    }

    #[tokio::test]
    async fn smart_budget_denial_defers_proactive_contact() {
        let llm = Arc::new(ScriptedLlm::always("hi"));
        let mut config = CognitionConfig::default();
        config.smart_calls_per_hour = 0;
        let cog = Cognition::new(llm.clone(), ToolRegistry::new(), config, Metrics::new());

        let urge = Signal::new(
            SignalType::ContactUrge,
            "neuron.contact_urge",
            Uuid::new_v4(),
            Utc::now(),
        )
        .with_value(0.7);

        let outcome = run(&cog, decision_for(urge, WakeReason::ContactPressure)).await;
        assert_eq!(outcome.action, CognitionAction::None);
        assert_eq!(outcome.intents.len(), 1);
        assert_eq!(outcome.intents[0].intent.kind(), "defer");
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn thought_depth_is_derived_and_capped() {
        let cog = cognition_with(Arc::new(ScriptedLlm::always("")));
        let corr = Uuid::new_v4();
        let now = Utc::now();

        // Root from a non-thought trigger
        let pattern = Signal::new(SignalType::PatternBreak, "meta.pattern_detector", corr, now)
            .with_value(0.8);
        let root = cog
            .make_thought(&pattern, "thought zero".to_string(), corr, now)
            .unwrap();
        assert_eq!(root.thought_depth(), Some(0));

        // Chain increments one step per trigger
        let mut current = root;
        for i in 1..=4u8 {
            current = cog
                .make_thought(&current, format!("thought {}", i), corr, now)
                .unwrap();
            assert_eq!(current.thought_depth(), Some(i));
        }

        // Depth 5 exceeds MAX_DEPTH=4 and is rejected
        let err = cog
            .make_thought(&current, "thought five".to_string(), corr, now)
            .unwrap_err();
        assert!(matches!(err, VigilError::MaxThoughtDepth { depth: 5, max: 4 }));
    }

    #[tokio::test]
    async fn depth_cap_increments_a_metric_without_crashing() {
        let metrics = Metrics::new();
        let cog = Cognition::new(
            Arc::new(ScriptedLlm::always("")),
            ToolRegistry::new(),
            CognitionConfig::default(),
            metrics.clone(),
        );
        let corr = Uuid::new_v4();
        let now = Utc::now();

        let seed = Signal::new(SignalType::Tick, "neuron.tick", corr, now).with_value(1.0);
        let mut current = cog
            .make_thought(&seed, "chain start".to_string(), corr, now)
            .unwrap();
        let mut accepted = 1;
        for i in 1..10 {
            match cog.make_thought(&current, format!("chain {}", i), corr, now) {
                Ok(next) => {
                    accepted += 1;
                    current = next;
                }
                Err(_) => break,
            }
        }
        // Depths 0..=4 accepted, the depth-5 link rejected
        assert_eq!(accepted, 5);
        assert_eq!(metrics.get(counters::THOUGHT_DROPPED_DEPTH), 1);
    }

    #[tokio::test]
    async fn duplicate_thoughts_are_deduped() {
        let metrics = Metrics::new();
        let cog = Cognition::new(
            Arc::new(ScriptedLlm::always("")),
            ToolRegistry::new(),
            CognitionConfig::default(),
            metrics.clone(),
        );
        let corr = Uuid::new_v4();
        let now = Utc::now();
        let seed = Signal::new(SignalType::Tick, "neuron.tick", corr, now);

        cog.make_thought(&seed, "Check on the deadline".to_string(), corr, now)
            .unwrap();
        let err = cog
            .make_thought(&seed, "check on the DEADLINE".to_string(), corr, now)
            .unwrap_err();
        assert!(err.is_silent());
        assert_eq!(metrics.get(counters::THOUGHT_DROPPED_DUPLICATE), 1);
    }

    #[tokio::test]
    async fn tool_loop_executes_then_responds() {
        struct WeatherTool;
        #[async_trait]
        impl Tool for WeatherTool {
            fn name(&self) -> &str {
                "weather"
            }
            fn description(&self) -> &str {
                "current weather"
            }
            fn parameters(&self) -> serde_json::Value {
                json!({"type": "object"})
            }
            async fn execute(&self, _args: serde_json::Value) -> Result<ToolOutput> {
                Ok(ToolOutput::ok(json!({"temp_c": 19})))
            }
        }

        let mut with_tool_call = response("");
        with_tool_call.finish_reason = FinishReason::ToolCalls;
        with_tool_call.tool_calls = vec![LlmToolCall {
            id: "1".to_string(),
            name: "weather".to_string(),
            arguments: json!({}),
        }];

        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(with_tool_call),
            Ok(response("19 degrees and clear")),
        ]));
        let tools = ToolRegistry::new();
        tools.register(Arc::new(WeatherTool));
        let cog = Cognition::new(
            llm.clone(),
            tools,
            CognitionConfig::default(),
            Metrics::new(),
        );

        let long = "What's the weather? ".repeat(30);
        let outcome = cog
            .run_turn(
                decision_for(user_message_signal(&long), WakeReason::UserMessage),
                AgentState::default(),
                AgentIdentity::default(),
                UserModel::default(),
                Uuid::new_v4(),
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.llm_calls, 2);
        match &outcome.intents[0].intent {
            Intent::SendMessage { text, .. } => assert_eq!(text, "19 degrees and clear"),
            other => panic!("unexpected intent: {:?}", other),
        }
    }

    #[tokio::test]
    async fn failing_tool_surfaces_honest_message() {
        struct BrokenTool;
        #[async_trait]
        impl Tool for BrokenTool {
            fn name(&self) -> &str {
                "lookup"
            }
            fn description(&self) -> &str {
                "always fails"
            }
            fn parameters(&self) -> serde_json::Value {
                json!({"type": "object"})
            }
            async fn execute(&self, _args: serde_json::Value) -> Result<ToolOutput> {
                Err(VigilError::Internal {
                    message: "backend gone".to_string(),
                })
            }
        }

        let mut with_tool_call = response("");
        with_tool_call.tool_calls = vec![LlmToolCall {
            id: "1".to_string(),
            name: "lookup".to_string(),
            arguments: json!({}),
        }];

        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(with_tool_call),
            Ok(response("sorry, could not find it")),
        ]));
        let tools = ToolRegistry::new();
        tools.register(Arc::new(BrokenTool));
        let cog = Cognition::new(llm, tools, CognitionConfig::default(), Metrics::new());

        let long = "Look this up for me? ".repeat(30);
        let outcome = cog
            .run_turn(
                decision_for(user_message_signal(&long), WakeReason::UserMessage),
                AgentState::default(),
                AgentIdentity::default(),
                UserModel::default(),
                Uuid::new_v4(),
                Utc::now(),
            )
            .await
            .unwrap();

        // First intent is the honest failure, then the final response
        let texts: Vec<String> = outcome
            .intents
            .iter()
            .filter_map(|i| match &i.intent {
                Intent::SendMessage { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(texts.len(), 2);
        assert!(texts[0].contains("lookup"));
    }

    #[tokio::test]
    async fn turn_slot_is_non_reentrant() {
        let cog = cognition_with(Arc::new(ScriptedLlm::always("x")));
        assert!(cog.try_begin_turn());
        assert!(!cog.try_begin_turn());
        cog.end_turn();
        assert!(cog.try_begin_turn());
    }

    #[tokio::test]
    async fn quiet_decision_produces_quiet_outcome() {
        let cog = cognition_with(Arc::new(ScriptedLlm::always("x")));
        let outcome = run(
            &cog,
            WakeDecision {
                should_wake: true,
                reason: Some(WakeReason::HighPrioritySignal),
                signals: vec![],
            },
        )
        .await;
        assert_eq!(outcome.situation, None);
        assert!(outcome.intents.is_empty());
    }
}
