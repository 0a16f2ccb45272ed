//! Circuit breaker
//!
//! Fault isolation around one named outbound dependency. Closed until
//! `max_failures` consecutive failures, then open; after `reset_timeout`
//! the next call carries a half-open probe.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{Result, VigilError};
use crate::metrics::{counters, Metrics};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub name: String,
    pub max_failures: u32,
    pub reset_timeout: Duration,
    /// Deadline applied to each wrapped operation
    pub op_timeout: Duration,
}

impl BreakerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_failures: 3,
            reset_timeout: Duration::from_secs(60),
            op_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures.max(1);
        self
    }

    pub fn with_reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = reset_timeout;
        self
    }

    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    status: BreakerStatus,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
}

/// Snapshot of breaker state for observation
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerStats {
    pub name: String,
    pub status: BreakerStatus,
    pub consecutive_failures: u32,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    metrics: Metrics,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, metrics: Metrics) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                status: BreakerStatus::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
            }),
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Run `work` behind the breaker with the configured deadline.
    ///
    /// Fails fast with `CircuitOpen` while open; the first call after
    /// `reset_timeout` transitions to half-open and carries the probe.
    pub async fn execute<F, Fut, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        {
            let mut inner = self.inner.lock();
            if inner.status == BreakerStatus::Open {
                let cooled_down = inner
                    .last_failure_at
                    .is_some_and(|at| at.elapsed() >= self.config.reset_timeout);
                if cooled_down {
                    inner.status = BreakerStatus::HalfOpen;
                    tracing::info!(breaker = %self.config.name, "half-open probe");
                } else {
                    return Err(VigilError::CircuitOpen {
                        name: self.config.name.clone(),
                    });
                }
            }
        }

        let outcome = tokio::time::timeout(self.config.op_timeout, work()).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(VigilError::Timeout {
                duration: self.config.op_timeout,
            }),
        };

        match result {
            Ok(value) => {
                let mut inner = self.inner.lock();
                if inner.status == BreakerStatus::HalfOpen {
                    tracing::info!(breaker = %self.config.name, "probe succeeded, closing");
                }
                inner.status = BreakerStatus::Closed;
                inner.consecutive_failures = 0;
                Ok(value)
            }
            Err(err) => {
                let mut inner = self.inner.lock();
                inner.consecutive_failures += 1;
                inner.last_failure_at = Some(Instant::now());
                let tripped = inner.status == BreakerStatus::HalfOpen
                    || inner.consecutive_failures >= self.config.max_failures;
                if tripped && inner.status != BreakerStatus::Open {
                    inner.status = BreakerStatus::Open;
                    self.metrics.incr(counters::BREAKER_OPENED);
                    tracing::warn!(
                        breaker = %self.config.name,
                        failures = inner.consecutive_failures,
                        "circuit opened"
                    );
                }
                Err(err)
            }
        }
    }

    /// Snapshot state and counters
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            name: self.config.name.clone(),
            status: inner.status,
            consecutive_failures: inner.consecutive_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            BreakerConfig::new("test")
                .with_max_failures(3)
                .with_reset_timeout(reset)
                .with_op_timeout(Duration::from_secs(5)),
            Metrics::new(),
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<()> {
        b.execute(|| async {
            Err::<(), _>(VigilError::ConnectionFailed {
                message: "boom".to_string(),
            })
        })
        .await
    }

    #[tokio::test]
    async fn success_keeps_breaker_closed() {
        let b = breaker(Duration::from_secs(60));
        let out = b.execute(|| async { Ok(42) }).await.unwrap();
        assert_eq!(out, 42);
        assert_eq!(b.stats().status, BreakerStatus::Closed);
    }

    #[tokio::test]
    async fn opens_exactly_at_max_failures() {
        let b = breaker(Duration::from_secs(60));
        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        assert_eq!(b.stats().status, BreakerStatus::Closed);

        fail(&b).await.unwrap_err();
        assert_eq!(b.stats().status, BreakerStatus::Open);
    }

    #[tokio::test]
    async fn open_fails_fast_without_invoking_dependency() {
        let b = breaker(Duration::from_secs(60));
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }

        let calls = AtomicU32::new(0);
        let err = b
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_closes_on_success() {
        let b = breaker(Duration::from_secs(60));
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }
        assert_eq!(b.stats().status, BreakerStatus::Open);

        tokio::time::advance(Duration::from_secs(61)).await;

        // Probe succeeds: breaker closes, counters zero
        b.execute(|| async { Ok(()) }).await.unwrap();
        assert_eq!(b.stats().status, BreakerStatus::Closed);
        assert_eq!(b.stats().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_reopens_on_failure() {
        let b = breaker(Duration::from_secs(60));
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        fail(&b).await.unwrap_err();
        assert_eq!(b.stats().status, BreakerStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn operation_timeout_counts_as_failure() {
        let b = CircuitBreaker::new(
            BreakerConfig::new("slow")
                .with_max_failures(1)
                .with_op_timeout(Duration::from_millis(10)),
            Metrics::new(),
        );

        let err = b
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Timeout { .. }));
        assert_eq!(b.stats().status, BreakerStatus::Open);
    }
}
