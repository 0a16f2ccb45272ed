//! Acknowledgment registry
//!
//! Pipeline-level memory that a class of signals has been handled, deferred,
//! or suppressed. Gates escalation in the aggregation stage so cognition is
//! not woken twice for the same thing.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::metrics::{counters, Metrics};
use crate::signal::SignalType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckKind {
    Handled,
    Deferred,
    Suppressed,
}

/// One acknowledgment entry, keyed by `signal_type[:source]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalAck {
    pub id: Uuid,
    pub signal_type: SignalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub kind: AckKind,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defer_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_at_ack: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_delta: Option<f64>,
    pub reason: String,
}

/// Result of consulting the registry for one signal
#[derive(Debug, Clone, PartialEq)]
pub struct AckCheck {
    pub blocked: bool,
    /// Deferral broken early because the value moved past the override delta
    pub is_override: bool,
    pub reason: Option<String>,
}

impl AckCheck {
    fn pass() -> Self {
        Self {
            blocked: false,
            is_override: false,
            reason: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AckConfig {
    /// Hard cap on requested deferrals, in hours
    pub max_deferral_hours: i64,
    /// Default value delta that breaks a deferral early
    pub default_override_delta: f64,
    /// Prune expired entries every this many checks
    pub prune_every: u32,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            max_deferral_hours: 24,
            default_override_delta: 0.25,
            prune_every: 25,
        }
    }
}

/// Registry of deferrals, suppressions, and handled markers.
///
/// Accessed only from the scheduler task; no interior locking needed.
pub struct AckRegistry {
    config: AckConfig,
    entries: HashMap<String, SignalAck>,
    checks_since_prune: u32,
    metrics: Metrics,
}

fn key_of(signal_type: SignalType, source: Option<&str>) -> String {
    match source {
        Some(source) => format!("{}:{}", signal_type.as_str(), source),
        None => signal_type.as_str().to_string(),
    }
}

impl AckRegistry {
    pub fn new(config: AckConfig, metrics: Metrics) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            checks_since_prune: 0,
            metrics,
        }
    }

    /// Register a handled marker; consumed by the next matching check
    pub fn register_handled(
        &mut self,
        signal_type: SignalType,
        source: Option<String>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.insert(SignalAck {
            id: Uuid::new_v4(),
            signal_type,
            source,
            kind: AckKind::Handled,
            created_at: now,
            defer_until: None,
            value_at_ack: None,
            override_delta: None,
            reason: reason.into(),
        });
    }

    /// Register a deferral. The requested horizon is truncated to the cap;
    /// the override delta defaults when not supplied.
    pub fn register_deferred(
        &mut self,
        signal_type: SignalType,
        source: Option<String>,
        hours: f64,
        value_at_ack: Option<f64>,
        override_delta: Option<f64>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let max = ChronoDuration::hours(self.config.max_deferral_hours);
        let requested = ChronoDuration::milliseconds((hours * 3_600_000.0) as i64);
        let effective = if requested > max { max } else { requested };
        let defer_until = now + effective;

        self.insert(SignalAck {
            id: Uuid::new_v4(),
            signal_type,
            source,
            kind: AckKind::Deferred,
            created_at: now,
            defer_until: Some(defer_until),
            value_at_ack,
            override_delta: Some(
                override_delta.unwrap_or(self.config.default_override_delta),
            ),
            reason: reason.into(),
        });
        defer_until
    }

    /// Register a suppression; blocks until explicitly cleared
    pub fn register_suppressed(
        &mut self,
        signal_type: SignalType,
        source: Option<String>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.insert(SignalAck {
            id: Uuid::new_v4(),
            signal_type,
            source,
            kind: AckKind::Suppressed,
            created_at: now,
            defer_until: None,
            value_at_ack: None,
            override_delta: None,
            reason: reason.into(),
        });
    }

    fn insert(&mut self, ack: SignalAck) {
        let key = key_of(ack.signal_type, ack.source.as_deref());
        tracing::debug!(key = %key, kind = ?ack.kind, reason = %ack.reason, "ack registered");
        self.entries.insert(key, ack);
    }

    /// Consult the registry for an incoming signal.
    ///
    /// Source-specific entries take precedence over type-wide ones.
    pub fn check(
        &mut self,
        signal_type: SignalType,
        source: Option<&str>,
        current_value: Option<f64>,
        now: DateTime<Utc>,
    ) -> AckCheck {
        self.checks_since_prune += 1;
        if self.checks_since_prune >= self.config.prune_every {
            self.prune(now);
        }

        let key = source
            .map(|s| key_of(signal_type, Some(s)))
            .filter(|k| self.entries.contains_key(k))
            .unwrap_or_else(|| key_of(signal_type, None));

        let Some(ack) = self.entries.get(&key) else {
            return AckCheck::pass();
        };

        match ack.kind {
            AckKind::Handled => {
                // Consumed: the next signal of this class flows through
                let reason = ack.reason.clone();
                self.entries.remove(&key);
                AckCheck {
                    blocked: false,
                    is_override: false,
                    reason: Some(reason),
                }
            }
            AckKind::Suppressed => {
                self.metrics.incr(counters::ACK_BLOCKED);
                AckCheck {
                    blocked: true,
                    is_override: false,
                    reason: Some(ack.reason.clone()),
                }
            }
            AckKind::Deferred => {
                if ack.defer_until.is_some_and(|until| now >= until) {
                    self.metrics.incr(counters::ACK_EXPIRED);
                    self.entries.remove(&key);
                    return AckCheck::pass();
                }

                if let (Some(current), Some(at_ack), Some(delta)) =
                    (current_value, ack.value_at_ack, ack.override_delta)
                {
                    if current - at_ack >= delta {
                        self.metrics.incr(counters::ACK_OVERRIDE);
                        self.entries.remove(&key);
                        return AckCheck {
                            blocked: false,
                            is_override: true,
                            reason: Some(format!(
                                "value rose {:.2} past deferral baseline",
                                current - at_ack
                            )),
                        };
                    }
                }

                self.metrics.incr(counters::ACK_BLOCKED);
                AckCheck {
                    blocked: true,
                    is_override: false,
                    reason: Some(ack.reason.clone()),
                }
            }
        }
    }

    /// Remove one entry
    pub fn clear(&mut self, signal_type: SignalType, source: Option<&str>) -> bool {
        self.entries.remove(&key_of(signal_type, source)).is_some()
    }

    /// Full wipe, e.g. when the user re-engages
    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    /// Drop expired deferrals
    pub fn prune(&mut self, now: DateTime<Utc>) {
        self.checks_since_prune = 0;
        let before = self.entries.len();
        self.entries.retain(|_, ack| {
            !(ack.kind == AckKind::Deferred && ack.defer_until.is_some_and(|until| now >= until))
        });
        let pruned = before - self.entries.len();
        if pruned > 0 {
            self.metrics.add(counters::ACK_EXPIRED, pruned as u64);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
