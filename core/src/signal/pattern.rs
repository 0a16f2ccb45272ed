//! Windowed pattern detection
//!
//! Watches per-type activity history and raises pattern matches for the
//! aggregation stage to turn into `pattern_break` signals. Three patterns
//! ship built in; plugins can register more.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};

use crate::signal::SignalType;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PatternDetectorConfig {
    /// History window in seconds
    pub window_secs: u64,
    /// |rate of change| per minute that counts as a spike
    pub rate_spike_threshold: f64,
    /// Minimum average activity for silence to be surprising
    pub silence_activity_floor: f64,
    /// Quiet time before silence is declared, in milliseconds
    pub silence_threshold_ms: u64,
    /// Energy below this is "low" for the correlation pattern
    pub low_energy: f64,
    /// Contact pressure above this is "high" for the correlation pattern
    pub high_pressure: f64,
}

impl Default for PatternDetectorConfig {
    fn default() -> Self {
        Self {
            window_secs: 600,
            rate_spike_threshold: 0.5,
            silence_activity_floor: 0.3,
            silence_threshold_ms: 300_000,
            low_energy: 0.3,
            high_pressure: 0.7,
        }
    }
}

/// A detected pattern, before it becomes a `pattern_break` signal
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub name: String,
    /// Normalized intensity in [0, 1]
    pub confidence: f64,
    pub signal_types: Vec<SignalType>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: DateTime<Utc>,
    value: f64,
}

/// Read-only view of recent activity, handed to pattern rules
pub struct ActivityView<'a> {
    detector: &'a PatternDetector,
    pub now: DateTime<Utc>,
}

impl<'a> ActivityView<'a> {
    /// Most recent observed value for a type
    pub fn latest(&self, signal_type: SignalType) -> Option<f64> {
        self.detector
            .series
            .get(&signal_type)
            .and_then(|s| s.back())
            .map(|s| s.value)
    }

    /// Slope over the window, units per minute
    pub fn rate_per_minute(&self, signal_type: SignalType) -> Option<f64> {
        let series = self.detector.series.get(&signal_type)?;
        let first = series.front()?;
        let last = series.back()?;
        let minutes = (last.at - first.at).num_milliseconds() as f64 / 60_000.0;
        if minutes <= f64::EPSILON {
            return None;
        }
        Some((last.value - first.value) / minutes)
    }

    /// Mean observed value for a type over the window
    pub fn window_average(&self, signal_type: SignalType) -> Option<f64> {
        let series = self.detector.series.get(&signal_type)?;
        if series.is_empty() {
            return None;
        }
        Some(series.iter().map(|s| s.value).sum::<f64>() / series.len() as f64)
    }

    /// Time since the last observation of a type, if any was ever seen
    pub fn idle_duration(&self, signal_type: SignalType) -> Option<ChronoDuration> {
        self.detector
            .last_seen
            .get(&signal_type)
            .map(|at| self.now - *at)
    }
}

/// A registered pattern rule
pub trait PatternRule: Send + Sync {
    fn id(&self) -> &str;
    fn evaluate(&self, view: &ActivityView<'_>) -> Option<PatternMatch>;
}

/// Windowed multi-series pattern detector
pub struct PatternDetector {
    config: PatternDetectorConfig,
    series: HashMap<SignalType, VecDeque<Sample>>,
    /// Last observation per type; survives window pruning so silence can be
    /// measured long after the series emptied
    last_seen: HashMap<SignalType, DateTime<Utc>>,
    extra_rules: Vec<Box<dyn PatternRule>>,
}

impl PatternDetector {
    pub fn new(config: PatternDetectorConfig) -> Self {
        Self {
            config,
            series: HashMap::new(),
            last_seen: HashMap::new(),
            extra_rules: Vec::new(),
        }
    }

    pub fn register(&mut self, rule: Box<dyn PatternRule>) {
        tracing::debug!(rule = rule.id(), "registered pattern rule");
        self.extra_rules.push(rule);
    }

    /// Record one observation for a signal type
    pub fn observe(&mut self, signal_type: SignalType, value: f64, now: DateTime<Utc>) {
        let series = self.series.entry(signal_type).or_default();
        series.push_back(Sample { at: now, value });
        self.last_seen.insert(signal_type, now);
        self.prune(now);
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - ChronoDuration::seconds(self.config.window_secs as i64);
        for series in self.series.values_mut() {
            while series.front().is_some_and(|s| s.at < cutoff) {
                series.pop_front();
            }
        }
    }

    /// Run all patterns over current history
    pub fn detect(&mut self, now: DateTime<Utc>) -> Vec<PatternMatch> {
        self.prune(now);
        let view = ActivityView {
            detector: self,
            now,
        };

        let mut matches = Vec::new();
        matches.extend(self.rate_spike(&view));
        matches.extend(self.sudden_silence(&view));
        matches.extend(self.cross_correlation(&view));
        for rule in &self.extra_rules {
            if let Some(m) = rule.evaluate(&view) {
                matches.push(m);
            }
        }
        matches
    }

    /// |rate of change| above threshold on any tracked series
    fn rate_spike(&self, view: &ActivityView<'_>) -> Option<PatternMatch> {
        let threshold = self.config.rate_spike_threshold;
        let mut best: Option<(SignalType, f64)> = None;
        for signal_type in self.series.keys() {
            if let Some(rate) = view.rate_per_minute(*signal_type) {
                if rate.abs() > threshold
                    && best.map_or(true, |(_, r)| rate.abs() > r.abs())
                {
                    best = Some((*signal_type, rate));
                }
            }
        }
        best.map(|(signal_type, rate)| PatternMatch {
            name: "rate_spike".to_string(),
            confidence: (rate.abs() / (threshold * 2.0)).clamp(0.0, 1.0),
            signal_types: vec![signal_type],
            reason: format!("{} changing at {:.2}/min", signal_type, rate),
        })
    }

    /// Busy window followed by nothing at all
    fn sudden_silence(&self, view: &ActivityView<'_>) -> Option<PatternMatch> {
        let avg = view.window_average(SignalType::UserMessage)?;
        if avg <= self.config.silence_activity_floor {
            return None;
        }
        let idle = view.idle_duration(SignalType::UserMessage)?;
        let threshold = ChronoDuration::milliseconds(self.config.silence_threshold_ms as i64);
        if idle <= threshold {
            return None;
        }
        let overrun = idle.num_milliseconds() as f64 / threshold.num_milliseconds() as f64;
        Some(PatternMatch {
            name: "sudden_silence".to_string(),
            confidence: ((overrun - 1.0) * 0.5 + 0.5).clamp(0.0, 1.0),
            signal_types: vec![SignalType::UserMessage],
            reason: format!(
                "active window (avg {:.2}) then {}s of silence",
                avg,
                idle.num_seconds()
            ),
        })
    }

    /// Energy low while contact pressure is high
    fn cross_correlation(&self, view: &ActivityView<'_>) -> Option<PatternMatch> {
        let energy = view.latest(SignalType::Energy)?;
        let pressure = view.latest(SignalType::ContactPressure)?;
        if energy >= self.config.low_energy || pressure <= self.config.high_pressure {
            return None;
        }
        let intensity = (self.config.low_energy - energy) + (pressure - self.config.high_pressure);
        Some(PatternMatch {
            name: "exhausted_but_social".to_string(),
            confidence: (0.5 + intensity).clamp(0.0, 1.0),
            signal_types: vec![SignalType::Energy, SignalType::ContactPressure],
            reason: format!("energy {:.2} low while pressure {:.2} high", energy, pressure),
        })
    }
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new(PatternDetectorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_spike_fires_on_steep_slope() {
        let mut det = PatternDetector::default();
        let t0 = Utc::now();
        det.observe(SignalType::ContactPressure, 0.1, t0);
        det.observe(
            SignalType::ContactPressure,
            0.9,
            t0 + ChronoDuration::seconds(60),
        );

        let matches = det.detect(t0 + ChronoDuration::seconds(61));
        assert!(matches.iter().any(|m| m.name == "rate_spike"));
    }

    #[test]
    fn slow_drift_does_not_spike() {
        let mut det = PatternDetector::default();
        let t0 = Utc::now();
        det.observe(SignalType::ContactPressure, 0.10, t0);
        det.observe(
            SignalType::ContactPressure,
            0.15,
            t0 + ChronoDuration::seconds(300),
        );

        let matches = det.detect(t0 + ChronoDuration::seconds(301));
        assert!(!matches.iter().any(|m| m.name == "rate_spike"));
    }

    #[test]
    fn sudden_silence_after_busy_window() {
        let mut det = PatternDetector::new(PatternDetectorConfig {
            silence_threshold_ms: 120_000,
            ..Default::default()
        });
        let t0 = Utc::now();
        det.observe(SignalType::UserMessage, 0.8, t0);
        det.observe(SignalType::UserMessage, 0.9, t0 + ChronoDuration::seconds(30));

        // Well past the silence threshold
        let matches = det.detect(t0 + ChronoDuration::seconds(330));
        let silence = matches.iter().find(|m| m.name == "sudden_silence");
        assert!(silence.is_some());
        assert!(silence.unwrap().confidence >= 0.5);
    }

    #[test]
    fn quiet_agent_has_no_silence_pattern() {
        let mut det = PatternDetector::default();
        let t0 = Utc::now();
        det.observe(SignalType::UserMessage, 0.1, t0);

        let matches = det.detect(t0 + ChronoDuration::seconds(900));
        assert!(!matches.iter().any(|m| m.name == "sudden_silence"));
    }

    #[test]
    fn correlation_needs_both_conditions() {
        let mut det = PatternDetector::default();
        let t0 = Utc::now();
        det.observe(SignalType::Energy, 0.2, t0);
        det.observe(SignalType::ContactPressure, 0.5, t0);
        assert!(!det
            .detect(t0)
            .iter()
            .any(|m| m.name == "exhausted_but_social"));

        det.observe(SignalType::ContactPressure, 0.9, t0 + ChronoDuration::seconds(1));
        assert!(det
            .detect(t0 + ChronoDuration::seconds(1))
            .iter()
            .any(|m| m.name == "exhausted_but_social"));
    }

    #[test]
    fn registered_rules_run() {
        struct AlwaysMatch;
        impl PatternRule for AlwaysMatch {
            fn id(&self) -> &str {
                "always"
            }
            fn evaluate(&self, _view: &ActivityView<'_>) -> Option<PatternMatch> {
                Some(PatternMatch {
                    name: "always".to_string(),
                    confidence: 1.0,
                    signal_types: vec![],
                    reason: "test".to_string(),
                })
            }
        }

        let mut det = PatternDetector::default();
        det.register(Box::new(AlwaysMatch));
        assert!(det.detect(Utc::now()).iter().any(|m| m.name == "always"));
    }
}
