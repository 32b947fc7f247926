// =============================================================================
// Momentum Engine — first derivatives of the raw microstructure streams
// =============================================================================
//
// Fits an ordinary-least-squares slope over the last `min_snapshots`
// observations of three streams:
//
//   velocity   swaps/sec proxy          -> slope in swaps/sec per minute
//   liquidity  TVL as fraction of the   -> slope in fraction of TVL per minute
//              latest value
//   entropy    bin distribution entropy -> slope in entropy units per minute
//
// All slopes are expressed per minute so that the migration thresholds
// (±0.40/min) and the risk bucket's outflow penalty (−0.02/min) share one
// unit. `valid` is false when the window is too short or a stream is
// constant (degenerate regression).
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::microstructure::entropy::pool_entropy;
use crate::telemetry::PoolSnapshot;

/// First derivatives of the raw microstructure streams, per minute.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MomentumSlopes {
    pub velocity_slope: f64,
    pub liquidity_slope: f64,
    pub entropy_slope: f64,
    pub valid: bool,
}

impl MomentumSlopes {
    /// Compute slopes over the last `min_snapshots` entries of `history`
    /// (oldest-first). Returns an all-zero, invalid result when the window
    /// is too short.
    pub fn compute(history: &[PoolSnapshot], min_snapshots: usize) -> Self {
        let window = min_snapshots.max(2);
        if history.len() < window {
            return Self::default();
        }
        let slice = &history[history.len() - window..];

        let t0 = slice[0].fetched_at;
        // Time axis in minutes so slopes come out per-minute directly.
        let xs: Vec<f64> = slice
            .iter()
            .map(|s| (s.fetched_at - t0) as f64 / 60_000.0)
            .collect();

        let velocities: Vec<f64> = slice.iter().map(|s| s.velocity).collect();

        let latest_tvl = slice[slice.len() - 1].liquidity_usd;
        let liquidity: Vec<f64> = if latest_tvl > 0.0 {
            slice.iter().map(|s| s.liquidity_usd / latest_tvl).collect()
        } else {
            vec![0.0; slice.len()]
        };

        let entropies: Vec<f64> = slice.iter().map(|s| pool_entropy(&s.bins)).collect();

        let velocity_slope = ols_slope(&xs, &velocities);
        let liquidity_slope = ols_slope(&xs, &liquidity);
        let entropy_slope = ols_slope(&xs, &entropies);

        // A regression over identical x values (or all-constant streams) has
        // no directional information.
        let valid = velocity_slope.is_some()
            && liquidity_slope.is_some()
            && entropy_slope.is_some()
            && !(is_constant(&velocities) && is_constant(&liquidity) && is_constant(&entropies));

        Self {
            velocity_slope: velocity_slope.unwrap_or(0.0),
            liquidity_slope: liquidity_slope.unwrap_or(0.0),
            entropy_slope: entropy_slope.unwrap_or(0.0),
            valid,
        }
    }
}

/// Least-squares slope of y over x; `None` when x has no variance.
fn ols_slope(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len() as f64;
    if n < 2.0 {
        return None;
    }

    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x) * (x - mean_x);
    }

    if var_x < f64::EPSILON {
        return None;
    }
    Some(cov / var_x)
}

fn is_constant(ys: &[f64]) -> bool {
    ys.windows(2).all(|w| (w[1] - w[0]).abs() < f64::EPSILON)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::BinLevel;
    use std::collections::HashMap;

    fn bins(levels: &[f64]) -> HashMap<i32, BinLevel> {
        levels
            .iter()
            .enumerate()
            .map(|(i, &liquidity)| {
                (
                    i as i32,
                    BinLevel {
                        liquidity,
                        swap_count: 0,
                    },
                )
            })
            .collect()
    }

    fn snap(fetched_at: i64, liquidity_usd: f64, velocity: f64) -> PoolSnapshot {
        PoolSnapshot {
            fetched_at,
            active_bin: 0,
            total_liquidity: liquidity_usd,
            liquidity_usd,
            velocity,
            bins: bins(&[10.0, 10.0, 10.0]),
        }
    }

    #[test]
    fn test_short_window_invalid() {
        let history = vec![snap(0, 100.0, 0.1)];
        let slopes = MomentumSlopes::compute(&history, 3);
        assert!(!slopes.valid);
        assert!(slopes.velocity_slope.abs() < f64::EPSILON);
    }

    #[test]
    fn test_rising_velocity_positive_slope() {
        // Velocity rises 0.1 per minute exactly.
        let history = vec![
            snap(0, 100.0, 0.1),
            snap(60_000, 100.0, 0.2),
            snap(120_000, 100.0, 0.3),
        ];
        let slopes = MomentumSlopes::compute(&history, 3);
        assert!(slopes.valid);
        assert!(
            (slopes.velocity_slope - 0.1).abs() < 1e-10,
            "expected 0.1/min, got {:.6}",
            slopes.velocity_slope
        );
    }

    #[test]
    fn test_liquidity_outflow_negative_slope() {
        // TVL halves over two minutes: normalised stream falls over time.
        let history = vec![
            snap(0, 200_000.0, 0.2),
            snap(60_000, 150_000.0, 0.2),
            snap(120_000, 100_000.0, 0.2),
        ];
        let slopes = MomentumSlopes::compute(&history, 3);
        assert!(slopes.valid);
        assert!(slopes.liquidity_slope < 0.0);
        // 200k -> 100k normalised by 100k is 2.0 -> 1.0 over 2 min = -0.5/min.
        assert!((slopes.liquidity_slope + 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_constant_streams_invalid() {
        let history = vec![
            snap(0, 100.0, 0.2),
            snap(60_000, 100.0, 0.2),
            snap(120_000, 100.0, 0.2),
        ];
        let slopes = MomentumSlopes::compute(&history, 3);
        assert!(!slopes.valid, "constant streams carry no momentum signal");
    }

    #[test]
    fn test_entropy_slope_direction() {
        // Book concentrates over time: entropy falls.
        let mut a = snap(0, 100.0, 0.2);
        let mut b = snap(60_000, 100.0, 0.2);
        let mut c = snap(120_000, 100.0, 0.2);
        a.bins = bins(&[10.0, 10.0, 10.0]);
        b.bins = bins(&[20.0, 8.0, 2.0]);
        c.bins = bins(&[28.0, 1.0, 1.0]);
        let slopes = MomentumSlopes::compute(&[a, b, c], 3);
        assert!(slopes.valid);
        assert!(slopes.entropy_slope < 0.0);
    }

    #[test]
    fn test_uses_only_trailing_window() {
        // A wild early value outside the window must not affect the slope.
        let history = vec![
            snap(0, 100.0, 99.0),
            snap(60_000, 100.0, 0.1),
            snap(120_000, 100.0, 0.2),
            snap(180_000, 100.0, 0.3),
        ];
        let slopes = MomentumSlopes::compute(&history, 3);
        assert!((slopes.velocity_slope - 0.1).abs() < 1e-10);
    }
}
