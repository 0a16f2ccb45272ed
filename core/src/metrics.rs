//! Runtime counters
//!
//! Every "dropped with a metric" clause in the pipeline routes through this
//! registry. Counters are cheap, named, and snapshotted at shutdown.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Well-known counter names
pub mod counters {
    pub const BUS_OVERFLOW: &str = "bus_overflow";
    pub const BUS_DISPLACED: &str = "bus_displaced";
    pub const SIGNAL_MALFORMED: &str = "signal_malformed";
    pub const FILTER_FAILURE: &str = "filter_failure";
    pub const NEURON_FAILURE: &str = "neuron_failure";
    pub const ACK_BLOCKED: &str = "ack_blocked";
    pub const ACK_OVERRIDE: &str = "ack_override";
    pub const ACK_EXPIRED: &str = "ack_expired";
    pub const THOUGHT_DROPPED_BUDGET: &str = "thought_dropped_budget";
    pub const THOUGHT_DROPPED_DEPTH: &str = "thought_dropped_depth";
    pub const THOUGHT_DROPPED_DUPLICATE: &str = "thought_dropped_duplicate";
    pub const TOOL_CALLS_CAPPED: &str = "tool_calls_capped";
    pub const COGNITION_TURNS: &str = "cognition_turns";
    pub const COGNITION_SKIPPED_BUSY: &str = "cognition_skipped_busy";
    pub const COGNITION_FAILED: &str = "cognition_failed";
    pub const SMART_ESCALATIONS: &str = "smart_escalations";
    pub const SMART_BUDGET_DENIED: &str = "smart_budget_denied";
    pub const INTENT_REJECTED: &str = "intent_rejected";
    pub const MESSAGES_SENT: &str = "messages_sent";
    pub const SEND_RETRIES: &str = "send_retries";
    pub const BREAKER_OPENED: &str = "breaker_opened";
    pub const SCHEDULES_FIRED: &str = "schedules_fired";
    pub const TICKS: &str = "ticks";
}

/// Named counter registry shared across the runtime.
///
/// Cloning is cheap; all clones share the same counters.
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<Mutex<BTreeMap<String, u64>>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one
    pub fn incr(&self, name: &str) {
        self.add(name, 1);
    }

    /// Increment a counter by `n`
    pub fn add(&self, name: &str, n: u64) {
        let mut map = self.inner.lock();
        *map.entry(name.to_string()).or_insert(0) += n;
    }

    /// Read a single counter (0 if never incremented)
    pub fn get(&self, name: &str) -> u64 {
        self.inner.lock().get(name).copied().unwrap_or(0)
    }

    /// Snapshot all counters, e.g. for the shutdown flush
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.inner.lock().clone()
    }

    /// Log the current counters at info level
    pub fn flush(&self) {
        for (name, value) in self.snapshot() {
            if value > 0 {
                tracing::info!(counter = %name, value, "metric");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.incr(counters::TICKS);
        metrics.incr(counters::TICKS);
        metrics.add(counters::MESSAGES_SENT, 3);

        assert_eq!(metrics.get(counters::TICKS), 2);
        assert_eq!(metrics.get(counters::MESSAGES_SENT), 3);
        assert_eq!(metrics.get(counters::BUS_OVERFLOW), 0);
    }

    #[test]
    fn clones_share_state() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.incr(counters::ACK_OVERRIDE);
        assert_eq!(metrics.get(counters::ACK_OVERRIDE), 1);
    }
}
