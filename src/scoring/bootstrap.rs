// =============================================================================
// Bootstrap Scorer — coarse-metric fallback for pools without telemetry
// =============================================================================
//
// A freshly discovered pool has no snapshot history, so the Tier-4 pipeline
// yields nothing for it. The bootstrap scorer produces a 0-100 admission
// score from the slow-changing descriptor fields alone:
//
//   volume-24h, TVL, fee tier, bin step (tighter = higher), token quality
//
// Every bootstrap score is tagged `is_bootstrap = true` so that aggregates
// and logs never silently mix it with telemetry-derived scores.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::PoolDescriptor;

// ---------------------------------------------------------------------------
// Component weights (sum to 1)
// ---------------------------------------------------------------------------

const WEIGHT_VOLUME: f64 = 0.30;
const WEIGHT_TVL: f64 = 0.25;
const WEIGHT_FEE_TIER: f64 = 0.15;
const WEIGHT_BIN_STEP: f64 = 0.15;
const WEIGHT_TOKEN_QUALITY: f64 = 0.15;

/// 24h volume that earns full marks on the volume component.
const VOLUME_NORM: f64 = 1_000_000.0;

/// TVL that earns full marks on the TVL component.
const TVL_NORM: f64 = 500_000.0;

/// Fee rate that earns full marks on the fee component (1%).
const FEE_NORM: f64 = 0.01;

/// Mints treated as blue-chip for the token-quality component.
const BLUE_CHIP_MINTS: &[&str] = &[
    "So11111111111111111111111111111111111111112",  // wSOL
    "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", // USDC
    "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB", // USDT
    "7vfCXTUXx5WJV5JADk17DUJ4ksgau7utNKj4b963voxs", // wETH
];

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

/// Bootstrap score with its component breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapScore {
    pub pool: String,
    pub score: f64,
    pub volume_component: f64,
    pub tvl_component: f64,
    pub fee_component: f64,
    pub bin_step_component: f64,
    pub token_quality_component: f64,
    /// Whether the score clears the configured admission minimum.
    pub admissible: bool,
    /// Always true; distinguishes this record from telemetry scores.
    pub is_bootstrap: bool,
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Stateless bootstrap scorer; the admission minimum comes from config.
pub struct BootstrapScorer {
    min_score: f64,
}

impl BootstrapScorer {
    pub fn new(min_score: f64) -> Self {
        Self { min_score }
    }

    /// Score a pool from its raw descriptor.
    pub fn score(&self, descriptor: &PoolDescriptor) -> BootstrapScore {
        let volume_component = ((descriptor.volume_24h / VOLUME_NORM) * 100.0).clamp(0.0, 100.0);
        let tvl_component = ((descriptor.liquidity_usd / TVL_NORM) * 100.0).clamp(0.0, 100.0);
        let fee_component = ((descriptor.base_fee_rate / FEE_NORM) * 100.0).clamp(0.0, 100.0);
        let bin_step_component = bin_step_score(descriptor.bin_step);
        let token_quality_component = token_quality(&descriptor.mint_x, &descriptor.mint_y);

        let score = volume_component * WEIGHT_VOLUME
            + tvl_component * WEIGHT_TVL
            + fee_component * WEIGHT_FEE_TIER
            + bin_step_component * WEIGHT_BIN_STEP
            + token_quality_component * WEIGHT_TOKEN_QUALITY;

        let admissible = score >= self.min_score;

        debug!(
            pool = %descriptor.address,
            score = format!("{:.1}", score),
            volume = format!("{:.1}", volume_component),
            tvl = format!("{:.1}", tvl_component),
            admissible,
            "bootstrap score computed"
        );

        BootstrapScore {
            pool: descriptor.address.clone(),
            score,
            volume_component,
            tvl_component,
            fee_component,
            bin_step_component,
            token_quality_component,
            admissible,
            is_bootstrap: true,
        }
    }
}

/// Step function over bin step: tighter spacing concentrates fee capture.
fn bin_step_score(bin_step: u32) -> f64 {
    match bin_step {
        0..=5 => 100.0,
        6..=10 => 80.0,
        11..=25 => 60.0,
        26..=50 => 40.0,
        _ => 20.0,
    }
}

/// Both tokens blue-chip -> 100, one -> 70, neither -> 40.
fn token_quality(mint_x: &str, mint_y: &str) -> f64 {
    let x = BLUE_CHIP_MINTS.contains(&mint_x);
    let y = BLUE_CHIP_MINTS.contains(&mint_y);
    match (x, y) {
        (true, true) => 100.0,
        (true, false) | (false, true) => 70.0,
        (false, false) => 40.0,
    }
}
