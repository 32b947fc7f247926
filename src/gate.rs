// =============================================================================
// Entry Gate — per-pool pre-deploy checks
// =============================================================================
//
// Runs the admission sequence against a pool's score record:
//
//   1. Telemetry valid                          -> NO_DATA
//   2. MHI (base score / 100) >= 0.45           -> MHI_LOW
//   3. Migration block                          -> MIGRATION_BLOCK
//   4. Raw floors: swap velocity >= 0.05,
//      entropy >= 0.35, velocity slope > -0.01,
//      liquidity slope > -0.01                  -> *_LOW / *_NEG
//   5. Score >= the regime's entry threshold    -> SCORE_LOW
//
// The migration block is checked before the raw floors: a sharp reversal
// drags the liquidity slope far past the -0.01 floor, and the block is the
// verdict that must be reported, not the floor it also happens to trip.
//
// Exception override: a pool with score > 50, fee intensity above 80% of
// its normaliser, and rising entropy bypasses the health checks — but
// NEVER an active migration block. Overrides are recorded on the verdict.
//
// Block reasons form a closed set so tests and dashboards match exactly.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::scoring::Tier4Score;

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Minimum microstructure health index (base score on a 0-1 scale).
const MIN_MHI: f64 = 0.45;
/// Minimum raw swap velocity (swaps per second).
const MIN_SWAP_VELOCITY: f64 = 0.05;
/// Minimum pool entropy.
const MIN_ENTROPY: f64 = 0.35;
/// Slope floors (per minute).
const MIN_VELOCITY_SLOPE: f64 = -0.01;
const MIN_LIQUIDITY_SLOPE: f64 = -0.01;

/// Override requirements.
const OVERRIDE_MIN_SCORE: f64 = 50.0;
/// 80% of the fee-intensity normaliser (0.001 per-TVL/sec).
const OVERRIDE_MIN_FEE_INTENSITY: f64 = 0.0008;
const OVERRIDE_MIN_ENTROPY_SLOPE: f64 = 0.0001;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Closed set of gate block reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockReason {
    MhiLow,
    SwapVelocityLow,
    EntropyLow,
    VelocityNeg,
    LiquidityNeg,
    ScoreLow,
    MigrationBlock,
    NoData,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MhiLow => write!(f, "MHI_LOW"),
            Self::SwapVelocityLow => write!(f, "SWAP_VELOCITY_LOW"),
            Self::EntropyLow => write!(f, "ENTROPY_LOW"),
            Self::VelocityNeg => write!(f, "VELOCITY_NEG"),
            Self::LiquidityNeg => write!(f, "LIQUIDITY_NEG"),
            Self::ScoreLow => write!(f, "SCORE_LOW"),
            Self::MigrationBlock => write!(f, "MIGRATION_BLOCK"),
            Self::NoData => write!(f, "NO_DATA"),
        }
    }
}

/// Outcome of one gate evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GateVerdict {
    pub admitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<BlockReason>,
    /// True when the exception override bypassed the health checks.
    pub override_applied: bool,
}

impl GateVerdict {
    fn admit(override_applied: bool) -> Self {
        Self {
            admitted: true,
            block_reason: None,
            override_applied,
        }
    }

    fn block(reason: BlockReason) -> Self {
        Self {
            admitted: false,
            block_reason: Some(reason),
            override_applied: false,
        }
    }
}

// ---------------------------------------------------------------------------
// EntryGate
// ---------------------------------------------------------------------------

pub struct EntryGate;

impl EntryGate {
    /// Evaluate a pool's score record against the admission sequence.
    pub fn evaluate(score: &Tier4Score) -> GateVerdict {
        // ── 1. Telemetry validity ────────────────────────────────────────
        if !score.valid {
            return GateVerdict::block(BlockReason::NoData);
        }

        // ── Exception override ───────────────────────────────────────────
        // Exceptional pools skip the health floors, but a live migration
        // block is never bypassed.
        let override_qualifies = score.tier4_score > OVERRIDE_MIN_SCORE
            && score.raw_fee_intensity > OVERRIDE_MIN_FEE_INTENSITY
            && score.slopes.entropy_slope > OVERRIDE_MIN_ENTROPY_SLOPE;

        if override_qualifies {
            if score.migration_blocked {
                debug!(pool = %score.pool, "override denied: migration block active");
                return GateVerdict::block(BlockReason::MigrationBlock);
            }
            info!(
                pool = %score.pool,
                score = format!("{:.1}", score.tier4_score),
                fee_intensity = format!("{:.5}", score.raw_fee_intensity),
                "entry gate override applied"
            );
            return GateVerdict::admit(true);
        }

        // ── 2. MHI ───────────────────────────────────────────────────────
        let mhi = score.base_score / 100.0;
        if mhi < MIN_MHI {
            return GateVerdict::block(BlockReason::MhiLow);
        }

        // ── 3. Migration block ───────────────────────────────────────────
        if score.migration_blocked {
            return GateVerdict::block(BlockReason::MigrationBlock);
        }

        // ── 4. Raw floors ────────────────────────────────────────────────
        if score.raw_swap_velocity < MIN_SWAP_VELOCITY {
            return GateVerdict::block(BlockReason::SwapVelocityLow);
        }
        if score.pool_entropy < MIN_ENTROPY {
            return GateVerdict::block(BlockReason::EntropyLow);
        }
        if score.slopes.velocity_slope <= MIN_VELOCITY_SLOPE {
            return GateVerdict::block(BlockReason::VelocityNeg);
        }
        if score.slopes.liquidity_slope <= MIN_LIQUIDITY_SLOPE {
            return GateVerdict::block(BlockReason::LiquidityNeg);
        }

        // ── 5. Regime entry threshold ────────────────────────────────────
        if score.tier4_score < score.entry_threshold {
            return GateVerdict::block(BlockReason::ScoreLow);
        }

        GateVerdict::admit(false)
    }
}
