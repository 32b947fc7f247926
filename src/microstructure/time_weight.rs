// =============================================================================
// Time-Weight Tracker — rolling consistency and spike detection
// =============================================================================
//
// Maintains a 30-minute rolling buffer of per-cycle raw velocities for each
// pool and derives the time-weight multiplier applied to the composite
// score:
//
//   consistency  = 1 - mean coefficient of variation of bin and swap
//                  velocity (steady flow scores high)
//   spike ratio  = max/avg - 1 of swap velocity (a single burst against a
//                  quiet baseline scores high)
//
//   multiplier = clamp(1 + consistencyBonus - spikePenalty, 0.75, 1.20)
//     consistencyBonus <= 0.15, spikePenalty <= 0.20
//
// Below the minimum sample count the pool still scores with multiplier 1.0
// but is flagged non-healthy so the entry gate can see the thin history.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Rolling window length.
const WINDOW_MS: i64 = 30 * 60 * 1_000;

/// Minimum samples before consistency statistics are meaningful.
const MIN_SAMPLES: usize = 5;

/// Maximum bonus awarded for perfectly consistent flow.
const MAX_CONSISTENCY_BONUS: f64 = 0.15;

/// Maximum penalty for a spike-dominated window.
const MAX_SPIKE_PENALTY: f64 = 0.20;

/// Spike ratio at which the penalty saturates (max = 4x the average).
const SPIKE_SATURATION: f64 = 3.0;

#[derive(Debug, Clone, Copy)]
struct Sample {
    at_ms: i64,
    raw_bin_velocity: f64,
    raw_swap_velocity: f64,
}

/// Outcome of the time-weight computation for one pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeWeightResult {
    pub multiplier: f64,
    pub consistency: f64,
    pub spike_ratio: f64,
    /// False while the rolling buffer holds fewer than the minimum samples.
    pub healthy: bool,
    pub samples: usize,
}

impl Default for TimeWeightResult {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            consistency: 0.0,
            spike_ratio: 0.0,
            healthy: false,
            samples: 0,
        }
    }
}

/// Per-pool rolling buffers of raw velocity observations.
pub struct TimeWeightTracker {
    buffers: RwLock<HashMap<String, VecDeque<Sample>>>,
}

impl TimeWeightTracker {
    pub fn new() -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
        }
    }

    /// Record one cycle's raw velocities for a pool, evicting samples older
    /// than the 30-minute window.
    pub fn record(&self, pool: &str, now_ms: i64, raw_bin_velocity: f64, raw_swap_velocity: f64) {
        let mut map = self.buffers.write();
        let ring = map.entry(pool.to_string()).or_default();
        ring.push_back(Sample {
            at_ms: now_ms,
            raw_bin_velocity,
            raw_swap_velocity,
        });
        while ring
            .front()
            .is_some_and(|s| now_ms - s.at_ms > WINDOW_MS)
        {
            ring.pop_front();
        }
    }

    /// Compute the time-weight multiplier for a pool at `now_ms`.
    pub fn compute(&self, pool: &str, now_ms: i64) -> TimeWeightResult {
        let map = self.buffers.read();
        let Some(ring) = map.get(pool) else {
            return TimeWeightResult::default();
        };

        let samples: Vec<&Sample> = ring
            .iter()
            .filter(|s| now_ms - s.at_ms <= WINDOW_MS)
            .collect();

        if samples.len() < MIN_SAMPLES {
            return TimeWeightResult {
                samples: samples.len(),
                ..TimeWeightResult::default()
            };
        }

        let bin_vels: Vec<f64> = samples.iter().map(|s| s.raw_bin_velocity).collect();
        let swap_vels: Vec<f64> = samples.iter().map(|s| s.raw_swap_velocity).collect();

        let cv_bin = coefficient_of_variation(&bin_vels);
        let cv_swap = coefficient_of_variation(&swap_vels);
        let consistency = (1.0 - (cv_bin + cv_swap) / 2.0).clamp(0.0, 1.0);
        let consistency_bonus = consistency * MAX_CONSISTENCY_BONUS;

        let spike_ratio = spike_ratio(&swap_vels);
        let spike_penalty =
            (spike_ratio / SPIKE_SATURATION).clamp(0.0, 1.0) * MAX_SPIKE_PENALTY;

        let multiplier = (1.0 + consistency_bonus - spike_penalty).clamp(0.75, 1.20);

        trace!(
            pool,
            samples = samples.len(),
            consistency = format!("{:.3}", consistency),
            spike_ratio = format!("{:.3}", spike_ratio),
            multiplier = format!("{:.3}", multiplier),
            "time weight computed"
        );

        TimeWeightResult {
            multiplier,
            consistency,
            spike_ratio,
            healthy: true,
            samples: samples.len(),
        }
    }

    /// Release the buffer for a pool that left the universe.
    pub fn drop_pool(&self, pool: &str) {
        self.buffers.write().remove(pool);
    }
}

impl Default for TimeWeightTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// std / mean, or 0 for an empty or zero-mean stream.
fn coefficient_of_variation(ys: &[f64]) -> f64 {
    if ys.is_empty() {
        return 0.0;
    }
    let mean = ys.iter().sum::<f64>() / ys.len() as f64;
    if mean.abs() < f64::EPSILON {
        return 0.0;
    }
    let variance = ys.iter().map(|y| (y - mean) * (y - mean)).sum::<f64>() / ys.len() as f64;
    variance.sqrt() / mean.abs()
}

/// max/avg - 1, or 0 for an empty or zero-mean stream.
fn spike_ratio(ys: &[f64]) -> f64 {
    if ys.is_empty() {
        return 0.0;
    }
    let mean = ys.iter().sum::<f64>() / ys.len() as f64;
    if mean.abs() < f64::EPSILON {
        return 0.0;
    }
    let max = ys.iter().cloned().fold(f64::MIN, f64::max);
    (max / mean - 1.0).max(0.0)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_below_min_samples_neutral_and_unhealthy() {
        let tracker = TimeWeightTracker::new();
        for i in 0..3 {
            tracker.record("p", i * 60_000, 0.04, 0.2);
        }
        let r = tracker.compute("p", 4 * 60_000);
        assert!(!r.healthy);
        assert!((r.multiplier - 1.0).abs() < f64::EPSILON);
        assert_eq!(r.samples, 3);
    }

    #[test]
    fn test_steady_flow_earns_bonus() {
        let tracker = TimeWeightTracker::new();
        for i in 0..10 {
            tracker.record("p", i * 60_000, 0.04, 0.20);
        }
        let r = tracker.compute("p", 10 * 60_000);
        assert!(r.healthy);
        assert!((r.consistency - 1.0).abs() < 1e-10);
        assert!(r.spike_ratio.abs() < 1e-10);
        // Full bonus, zero penalty.
        assert!((r.multiplier - 1.15).abs() < 1e-10);
    }

    #[test]
    fn test_spiky_flow_penalised() {
        let tracker = TimeWeightTracker::new();
        // Nine quiet samples and one huge burst.
        for i in 0..9 {
            tracker.record("p", i * 60_000, 0.01, 0.05);
        }
        tracker.record("p", 9 * 60_000, 0.01, 2.0);
        let r = tracker.compute("p", 9 * 60_000);
        assert!(r.healthy);
        assert!(r.spike_ratio > 3.0, "burst should dominate: {:.3}", r.spike_ratio);
        assert!(r.multiplier < 1.0);
        assert!(r.multiplier >= 0.75);
    }

    #[test]
    fn test_multiplier_bounds() {
        let tracker = TimeWeightTracker::new();
        for i in 0..20 {
            // Alternate wildly to maximise CV and spike together.
            let v = if i % 2 == 0 { 0.01 } else { 5.0 };
            tracker.record("p", i * 60_000, v, v);
        }
        let r = tracker.compute("p", 20 * 60_000);
        assert!(r.multiplier >= 0.75 && r.multiplier <= 1.20);
    }

    #[test]
    fn test_old_samples_evicted() {
        let tracker = TimeWeightTracker::new();
        for i in 0..10 {
            tracker.record("p", i * 60_000, 0.04, 0.2);
        }
        // Jump two hours ahead; a single new sample makes everything else stale.
        tracker.record("p", 2 * 60 * 60_000, 0.04, 0.2);
        let r = tracker.compute("p", 2 * 60 * 60_000);
        assert_eq!(r.samples, 1);
        assert!(!r.healthy);
    }

    #[test]
    fn test_drop_pool_clears_buffer() {
        let tracker = TimeWeightTracker::new();
        for i in 0..10 {
            tracker.record("p", i * 60_000, 0.04, 0.2);
        }
        tracker.drop_pool("p");
        let r = tracker.compute("p", 10 * 60_000);
        assert_eq!(r.samples, 0);
    }
}
