use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// Percentiles are refreshed after every this many samples, not on each one.
pub const RECOMPUTE_EVERY: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Samples retained for percentile and average computation; oldest are evicted first.
    pub history_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { history_capacity: 1024 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Total samples recorded since start or last reset.
    pub count: u64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub avg_confidence: f64,
}

/// Confidences are summed in 2^-32 fixed point so eviction subtracts exactly what was added.
const CONFIDENCE_ONE: f64 = (1u64 << 32) as f64;

#[derive(Debug)]
struct State {
    capacity: usize,
    latencies: VecDeque<f64>,
    confidences: VecDeque<u64>,
    confidence_sum: u64,
    snapshot: MetricsSnapshot,
}

impl State {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            latencies: VecDeque::with_capacity(capacity),
            confidences: VecDeque::with_capacity(capacity),
            confidence_sum: 0,
            snapshot: MetricsSnapshot::default(),
        }
    }

    fn push(&mut self, latency_ms: f64, confidence: f64) {
        if self.latencies.len() == self.capacity {
            self.latencies.pop_front();
            if let Some(old) = self.confidences.pop_front() {
                self.confidence_sum -= old;
            }
        }
        let fixed = (confidence * CONFIDENCE_ONE).round() as u64;
        self.latencies.push_back(latency_ms);
        self.confidences.push_back(fixed);
        self.confidence_sum += fixed;

        let s = &mut self.snapshot;
        s.count += 1;
        s.avg_confidence = self.confidence_sum as f64 / CONFIDENCE_ONE / self.confidences.len() as f64;
        if s.count % RECOMPUTE_EVERY == 0 {
            let mut sorted: Vec<f64> = self.latencies.iter().copied().collect();
            sorted.sort_by(f64::total_cmp);
            s.p50_latency_ms = percentile(&sorted, 0.50);
            s.p95_latency_ms = percentile(&sorted, 0.95);
        }
    }
}

/// `sorted[round(p * (n-1))]`, index clamped; 0 for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let last = sorted.len() - 1;
    let idx = (p * last as f64).round().clamp(0.0, last as f64) as usize;
    sorted[idx]
}

/// Rolling latency/confidence aggregator shared across detection workers.
///
/// All reads and writes go through one mutex, so a snapshot never observes a
/// half-finished percentile refresh.
#[derive(Debug)]
pub struct MetricsCollector {
    state: Mutex<State>,
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        Self { state: Mutex::new(State::new(config.history_capacity)) }
    }

    // State is consistent between statements; poisoning is recovered.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, latency_ms: f64, confidence: f64) {
        if !latency_ms.is_finite() || !confidence.is_finite() {
            return;
        }
        self.lock().push(latency_ms, confidence.clamp(0.0, 1.0));
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.lock().snapshot
    }

    /// Drop all history and counters.
    pub fn reset(&self) {
        let mut state = self.lock();
        let capacity = state.capacity;
        *state = State::new(capacity);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_use_rounded_index() {
        let sorted: Vec<f64> = (1..=20).map(|i| i as f64 * 10.0).collect();
        // round(0.5 * 19) = 10, round(0.95 * 19) = 18
        assert_eq!(percentile(&sorted, 0.5), 110.0);
        assert_eq!(percentile(&sorted, 0.95), 190.0);
        assert_eq!(percentile(&sorted, 1.5), 200.0);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn percentiles_refresh_only_every_twentieth_sample() {
        let m = MetricsCollector::default();
        for i in 1..=19 {
            m.record(i as f64 * 10.0, 0.5);
        }
        let s = m.snapshot();
        assert_eq!(s.count, 19);
        assert_eq!(s.p50_latency_ms, 0.0);

        m.record(200.0, 0.5);
        let s = m.snapshot();
        assert_eq!(s.count, 20);
        assert_eq!(s.p50_latency_ms, 110.0);
        assert_eq!(s.p95_latency_ms, 190.0);
        assert_eq!(s.avg_confidence, 0.5);
    }

    #[test]
    fn history_is_bounded() {
        let m = MetricsCollector::new(MetricsConfig { history_capacity: 20 });
        for _ in 0..20 {
            m.record(1000.0, 1.0);
        }
        for _ in 0..20 {
            m.record(5.0, 0.0);
        }
        let s = m.snapshot();
        assert_eq!(s.count, 40);
        assert_eq!(s.p95_latency_ms, 5.0);
        assert_eq!(s.avg_confidence, 0.0);
    }

    #[test]
    fn evicted_confidences_leave_no_residue() {
        let m = MetricsCollector::new(MetricsConfig { history_capacity: 64 });
        for i in 0..10_000 {
            m.record(1.0, [0.1, 0.7, 0.33, 0.999_999][i % 4]);
        }
        for _ in 0..64 {
            m.record(1.0, 0.0);
        }
        assert_eq!(m.snapshot().avg_confidence, 0.0);
    }

    #[test]
    fn reset_clears_everything() {
        let m = MetricsCollector::default();
        for _ in 0..25 {
            m.record(3.0, 0.9);
        }
        m.reset();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }
}
