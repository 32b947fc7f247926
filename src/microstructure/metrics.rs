// =============================================================================
// Microstructure Metrics — per-pool, per-cycle short-window measurements
// =============================================================================
//
// Derives the five pillar inputs from the two most recent snapshots of a
// pool's history:
//
//   binVelocity    |Δ active bin| / dt            normalised by 0.05 bins/s
//   swapVelocity   swaps per second               normalised by 0.30 swaps/s
//   liquidityFlow  |Δ TVL| / TVL                  normalised by 0.10
//   feeIntensity   fee rate per second per TVL    normalised by 0.001
//   poolEntropy    bin distribution entropy       naturally in [0, 1]
//
// Normalised pillars live on a 0-100 scale. Raw values are retained because
// the entry gate and regime classifier threshold on raw units, not pillar
// scores.
//
// A pool with fewer than `min_snapshots` observations yields no metrics at
// all (absent, not zero) — consumers treat absence as non-tradable.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::microstructure::entropy::pool_entropy;
use crate::telemetry::PoolSnapshot;

// ---------------------------------------------------------------------------
// Normalisation constants
// ---------------------------------------------------------------------------

/// Bin velocity that maps to a pillar score of 100 (bins per second).
const BIN_VELOCITY_NORM: f64 = 0.05;
/// Swap velocity that maps to a pillar score of 100 (swaps per second).
const SWAP_VELOCITY_NORM: f64 = 0.30;
/// Liquidity flow fraction that maps to a pillar score of 100.
const LIQUIDITY_FLOW_NORM: f64 = 0.10;
/// Fee rate per second per unit TVL that maps to a pillar score of 100.
const FEE_INTENSITY_NORM: f64 = 0.001;

// ---------------------------------------------------------------------------
// Liveness gate thresholds (raw units)
// ---------------------------------------------------------------------------

const ALIVE_MIN_BIN_VELOCITY: f64 = 0.03;
const ALIVE_MIN_SWAP_VELOCITY: f64 = 0.10;
const ALIVE_MIN_ENTROPY: f64 = 0.65;
const ALIVE_MIN_LIQUIDITY_FLOW: f64 = 0.005;

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

/// Derived microstructure metrics for one pool over one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicrostructureMetrics {
    // Normalised pillar scores, each in [0, 100].
    pub bin_velocity: f64,
    pub swap_velocity: f64,
    pub liquidity_flow: f64,
    pub fee_intensity: f64,

    // Raw values in native units.
    /// |Δ active bin| per second.
    pub raw_bin_velocity: f64,
    /// Δ active bin per second, sign preserved (drift direction).
    pub signed_bin_velocity: f64,
    /// Swaps per second.
    pub raw_swap_velocity: f64,
    /// |Δ TVL| as a fraction of current TVL.
    pub raw_liquidity_flow: f64,
    /// Signed Δ TVL as a fraction of current TVL (negative = outflow).
    pub signed_liquidity_flow: f64,
    /// Fee rate per second per unit TVL.
    pub raw_fee_intensity: f64,

    /// Shannon entropy of the bin liquidity distribution, [0, 1].
    pub pool_entropy: f64,

    /// Whether the pool passes all four liveness gates.
    pub is_market_alive: bool,
    /// Human-readable reasons for failed liveness gates.
    pub gating_reasons: Vec<String>,

    /// Bounds of the measurement window (unix ms).
    pub window_start: i64,
    pub window_end: i64,
}

impl MicrostructureMetrics {
    /// Compute metrics from a pool's history (oldest-first).
    ///
    /// `fee_rate` is the pool's base fee as a fraction (e.g. 0.003).
    /// Returns `None` when the history holds fewer than `min_snapshots`
    /// observations — consumers must treat the pool as non-tradable.
    pub fn compute(
        history: &[PoolSnapshot],
        fee_rate: f64,
        min_snapshots: usize,
    ) -> Option<Self> {
        if history.len() < min_snapshots || history.len() < 2 {
            return None;
        }

        let latest = &history[history.len() - 1];
        let previous = &history[history.len() - 2];

        let dt_secs = (latest.fetched_at - previous.fetched_at) as f64 / 1_000.0;
        if dt_secs <= 0.0 {
            // The store enforces monotonicity; a zero dt means duplicate
            // ingestion slipped through and the pool is unreadable this cycle.
            return None;
        }

        // --- Bin velocity ----------------------------------------------------
        let signed_bin_velocity =
            (latest.active_bin - previous.active_bin) as f64 / dt_secs;
        let raw_bin_velocity = signed_bin_velocity.abs();
        let bin_velocity = normalise(raw_bin_velocity, BIN_VELOCITY_NORM);

        // --- Swap velocity ---------------------------------------------------
        // Prefer the venue-reported swaps/sec proxy; fall back to the swap
        // count delta across the bin distribution when the proxy is absent.
        let raw_swap_velocity = if latest.velocity > 0.0 {
            latest.velocity
        } else {
            let latest_swaps: u32 = latest.bins.values().map(|b| b.swap_count).sum();
            let prev_swaps: u32 = previous.bins.values().map(|b| b.swap_count).sum();
            latest_swaps.saturating_sub(prev_swaps) as f64 / dt_secs
        };
        let swap_velocity = normalise(raw_swap_velocity, SWAP_VELOCITY_NORM);

        // --- Liquidity flow --------------------------------------------------
        let (raw_liquidity_flow, signed_liquidity_flow) = if latest.liquidity_usd > 0.0 {
            let delta = latest.liquidity_usd - previous.liquidity_usd;
            let signed = delta / latest.liquidity_usd;
            (signed.abs(), signed)
        } else {
            (0.0, 0.0)
        };
        let liquidity_flow = normalise(raw_liquidity_flow, LIQUIDITY_FLOW_NORM);

        // --- Fee intensity ---------------------------------------------------
        // Fees accrue per swap at the pool's base rate; per-TVL fee intensity
        // is therefore the swap rate scaled by the fee fraction.
        let raw_fee_intensity = raw_swap_velocity * fee_rate;
        let fee_intensity = normalise(raw_fee_intensity, FEE_INTENSITY_NORM);

        // --- Entropy ---------------------------------------------------------
        let entropy = pool_entropy(&latest.bins);

        // --- Liveness gating -------------------------------------------------
        let mut gating_reasons = Vec::new();
        if raw_bin_velocity < ALIVE_MIN_BIN_VELOCITY {
            gating_reasons.push(format!(
                "bin velocity {:.4} < {:.2} bins/s",
                raw_bin_velocity, ALIVE_MIN_BIN_VELOCITY
            ));
        }
        if raw_swap_velocity < ALIVE_MIN_SWAP_VELOCITY {
            gating_reasons.push(format!(
                "swap velocity {:.4} < {:.2} swaps/s",
                raw_swap_velocity, ALIVE_MIN_SWAP_VELOCITY
            ));
        }
        if entropy < ALIVE_MIN_ENTROPY {
            gating_reasons.push(format!(
                "entropy {:.3} < {:.2}",
                entropy, ALIVE_MIN_ENTROPY
            ));
        }
        if raw_liquidity_flow < ALIVE_MIN_LIQUIDITY_FLOW {
            gating_reasons.push(format!(
                "liquidity flow {:.5} < {:.3}",
                raw_liquidity_flow, ALIVE_MIN_LIQUIDITY_FLOW
            ));
        }
        let is_market_alive = gating_reasons.is_empty();

        trace!(
            bin_velocity = format!("{:.1}", bin_velocity),
            swap_velocity = format!("{:.1}", swap_velocity),
            liquidity_flow = format!("{:.1}", liquidity_flow),
            fee_intensity = format!("{:.1}", fee_intensity),
            entropy = format!("{:.3}", entropy),
            alive = is_market_alive,
            "microstructure metrics computed"
        );

        Some(Self {
            bin_velocity,
            swap_velocity,
            liquidity_flow,
            fee_intensity,
            raw_bin_velocity,
            signed_bin_velocity,
            raw_swap_velocity,
            raw_liquidity_flow,
            signed_liquidity_flow,
            raw_fee_intensity,
            pool_entropy: entropy,
            is_market_alive,
            gating_reasons,
            window_start: previous.fetched_at,
            window_end: latest.fetched_at,
        })
    }
}

/// Map a raw value onto the 0-100 pillar scale against its normaliser.
fn normalise(raw: f64, norm: f64) -> f64 {
    if norm <= 0.0 {
        return 0.0;
    }
    ((raw / norm) * 100.0).clamp(0.0, 100.0)
}
