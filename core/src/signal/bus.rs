//! Priority signal bus
//!
//! Bounded, priority-ordered transport between pipeline stages. Ports push
//! from their own tasks; the heartbeat drains on the scheduler task. The bus
//! is the single cross-thread synchronization boundary in the runtime.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{Result, VigilError};
use crate::metrics::{counters, Metrics};
use crate::signal::{Priority, Signal};

pub const DEFAULT_CAPACITY: usize = 1024;

struct BusInner {
    /// One FIFO lane per priority, indexed by `Priority::rank()`
    lanes: [VecDeque<Signal>; 4],
    len: usize,
}

impl BusInner {
    fn lowest_occupied(&self) -> Option<usize> {
        (0..4).rev().find(|&rank| !self.lanes[rank].is_empty())
    }
}

/// Multi-producer / single-consumer priority queue.
///
/// Ordering: strict priority across lanes, FIFO within a lane. Signals pushed
/// with the same correlation id land in the same lane in push order, so a
/// correlation group is never reordered against itself.
#[derive(Clone)]
pub struct SignalBus {
    inner: Arc<Mutex<BusInner>>,
    capacity: usize,
    metrics: Metrics,
}

impl SignalBus {
    pub fn new(capacity: usize, metrics: Metrics) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                lanes: [
                    VecDeque::new(),
                    VecDeque::new(),
                    VecDeque::new(),
                    VecDeque::new(),
                ],
                len: 0,
            })),
            capacity: capacity.max(1),
            metrics,
        }
    }

    pub fn with_default_capacity(metrics: Metrics) -> Self {
        Self::new(DEFAULT_CAPACITY, metrics)
    }

    /// Non-blocking push.
    ///
    /// When at capacity: LOW/IDLE pushes are rejected; NORMAL pushes evict a
    /// queued LOW/IDLE signal if one exists, otherwise they are rejected;
    /// HIGH pushes always succeed by displacing the newest lowest-priority
    /// queued signal.
    pub fn push(&self, signal: Signal) -> Result<()> {
        if let Err(e) = signal.validate() {
            self.metrics.incr(counters::SIGNAL_MALFORMED);
            tracing::warn!(signal_type = %signal.signal_type, error = %e, "dropping malformed signal");
            return Err(e);
        }

        let mut inner = self.inner.lock();
        if inner.len >= self.capacity {
            match signal.priority {
                Priority::Low | Priority::Idle => {
                    self.metrics.incr(counters::BUS_OVERFLOW);
                    tracing::debug!(signal_type = %signal.signal_type, "bus full, dropping droppable signal");
                    return Err(VigilError::BusFull {
                        signal_type: signal.signal_type,
                    });
                }
                Priority::Normal => {
                    let evictable = inner
                        .lowest_occupied()
                        .filter(|&rank| rank > Priority::Normal.rank());
                    match evictable {
                        Some(rank) => {
                            inner.lanes[rank].pop_back();
                            inner.len -= 1;
                            self.metrics.incr(counters::BUS_DISPLACED);
                        }
                        None => {
                            self.metrics.incr(counters::BUS_OVERFLOW);
                            return Err(VigilError::BusFull {
                                signal_type: signal.signal_type,
                            });
                        }
                    }
                }
                Priority::High => {
                    // HIGH is never dropped; evict the newest lowest-priority item
                    if let Some(rank) = inner.lowest_occupied() {
                        inner.lanes[rank].pop_back();
                        inner.len -= 1;
                        self.metrics.incr(counters::BUS_DISPLACED);
                    }
                }
            }
        }

        let rank = signal.priority.rank();
        inner.lanes[rank].push_back(signal);
        inner.len += 1;
        Ok(())
    }

    /// Drain up to `max` signals in priority-then-FIFO order
    pub fn drain(&self, max: usize) -> Vec<Signal> {
        let mut inner = self.inner.lock();
        let mut out = Vec::with_capacity(max.min(inner.len));
        for rank in 0..4 {
            while out.len() < max {
                match inner.lanes[rank].pop_front() {
                    Some(signal) => {
                        inner.len -= 1;
                        out.push(signal);
                    }
                    None => break,
                }
            }
        }
        out
    }

    /// Re-queue signals at the front of their priority lanes, preserving
    /// relative order. Used when cognition is busy and its thought signals
    /// must be delivered first on the next turn.
    pub fn requeue_front(&self, signals: Vec<Signal>) {
        let mut inner = self.inner.lock();
        for signal in signals.into_iter().rev() {
            let rank = signal.priority.rank();
            inner.lanes[rank].push_front(signal);
            inner.len += 1;
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        for lane in inner.lanes.iter_mut() {
            lane.clear();
        }
        inner.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalType;
    use chrono::Utc;
    use uuid::Uuid;

    fn bus(capacity: usize) -> SignalBus {
        SignalBus::new(capacity, Metrics::new())
    }

    fn signal(priority: Priority) -> Signal {
        Signal::new(SignalType::Tick, "neuron.tick", Uuid::new_v4(), Utc::now())
            .with_priority(priority)
    }

    #[test]
    fn drain_is_priority_then_fifo() {
        let bus = bus(16);
        bus.push(signal(Priority::Low)).unwrap();
        bus.push(signal(Priority::Normal)).unwrap();
        bus.push(signal(Priority::High)).unwrap();
        bus.push(signal(Priority::Normal)).unwrap();

        let drained = bus.drain(10);
        let priorities: Vec<Priority> = drained.iter().map(|s| s.priority).collect();
        assert_eq!(
            priorities,
            vec![Priority::High, Priority::Normal, Priority::Normal, Priority::Low]
        );
    }

    #[test]
    fn fifo_within_priority() {
        let bus = bus(16);
        let a = signal(Priority::Normal);
        let b = signal(Priority::Normal);
        let (a_id, b_id) = (a.id, b.id);
        bus.push(a).unwrap();
        bus.push(b).unwrap();

        let drained = bus.drain(2);
        assert_eq!(drained[0].id, a_id);
        assert_eq!(drained[1].id, b_id);
    }

    #[test]
    fn low_is_dropped_at_capacity() {
        let bus = bus(2);
        bus.push(signal(Priority::Normal)).unwrap();
        bus.push(signal(Priority::Normal)).unwrap();

        let err = bus.push(signal(Priority::Low)).unwrap_err();
        assert!(matches!(err, VigilError::BusFull { .. }));
        assert_eq!(bus.size(), 2);
    }

    #[test]
    fn high_displaces_lowest_at_capacity() {
        let bus = bus(2);
        bus.push(signal(Priority::Normal)).unwrap();
        bus.push(signal(Priority::Idle)).unwrap();

        bus.push(signal(Priority::High)).unwrap();
        assert_eq!(bus.size(), 2);

        let drained = bus.drain(10);
        assert_eq!(drained[0].priority, Priority::High);
        assert_eq!(drained[1].priority, Priority::Normal);
    }

    #[test]
    fn normal_evicts_idle_at_capacity() {
        let bus = bus(2);
        bus.push(signal(Priority::Idle)).unwrap();
        bus.push(signal(Priority::Normal)).unwrap();

        bus.push(signal(Priority::Normal)).unwrap();
        let drained = bus.drain(10);
        assert!(drained.iter().all(|s| s.priority == Priority::Normal));
    }

    #[test]
    fn normal_rejected_when_no_droppable_item() {
        let bus = bus(2);
        bus.push(signal(Priority::High)).unwrap();
        bus.push(signal(Priority::Normal)).unwrap();

        assert!(bus.push(signal(Priority::Normal)).is_err());
        assert_eq!(bus.size(), 2);
    }

    #[test]
    fn requeue_front_preserves_order() {
        let bus = bus(16);
        bus.push(signal(Priority::Normal)).unwrap();

        let a = signal(Priority::Normal);
        let b = signal(Priority::Normal);
        let (a_id, b_id) = (a.id, b.id);
        bus.requeue_front(vec![a, b]);

        let drained = bus.drain(3);
        assert_eq!(drained[0].id, a_id);
        assert_eq!(drained[1].id, b_id);
    }

    #[test]
    fn malformed_signal_is_rejected() {
        let bus = bus(16);
        let s = Signal::new(SignalType::Thought, "cognition.thought", Uuid::new_v4(), Utc::now());
        assert!(bus.push(s).is_err());
        assert!(bus.is_empty());
    }

    #[test]
    fn drain_respects_max() {
        let bus = bus(16);
        for _ in 0..5 {
            bus.push(signal(Priority::Normal)).unwrap();
        }
        assert_eq!(bus.drain(3).len(), 3);
        assert_eq!(bus.size(), 2);
    }
}
