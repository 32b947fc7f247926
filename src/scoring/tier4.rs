// =============================================================================
// Tier-4 Scorer — composite pool score with regime-aware multipliers
// =============================================================================
//
// Composes five pillar scores into a base score, then applies four
// multipliers:
//
//   tier4Score = baseScore x regime x migration x slope x timeWeight
//
// Pillar weights (sum to 1): bin velocity 0.30, swap velocity 0.25,
// liquidity flow 0.20, fee intensity 0.15, entropy 0.10.
//
// The scorer also yields the bin-width recommendation for range shaping and
// the regime's dynamic entry/exit thresholds.
//
// Migration reversal detection is stateful per pool: a pool whose liquidity
// was flowing in and now drains faster than -0.40/min (or the inverse) has
// its migration multiplier zeroed for the cycle, which blocks entry.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::microstructure::{MicrostructureMetrics, MomentumSlopes, TimeWeightResult};

// ---------------------------------------------------------------------------
// Pillar weights
// ---------------------------------------------------------------------------

const WEIGHT_BIN_VELOCITY: f64 = 0.30;
const WEIGHT_SWAP_VELOCITY: f64 = 0.25;
const WEIGHT_LIQUIDITY_FLOW: f64 = 0.20;
const WEIGHT_FEE_INTENSITY: f64 = 0.15;
const WEIGHT_ENTROPY: f64 = 0.10;

/// Entropy level treated as "full marks" on the entropy pillar.
const ENTROPY_TARGET: f64 = 0.70;

/// Liquidity slope (fraction of TVL per minute) beyond which migration is
/// directional. Strictly greater-than: a slope of exactly ±0.40 is neutral.
const MIGRATION_SLOPE_PER_MIN: f64 = 0.40;

// ---------------------------------------------------------------------------
// Regime / migration enums
// ---------------------------------------------------------------------------

/// Per-pool score regime derived from bin drift and liquidity slope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScoreRegime {
    Bull,
    Neutral,
    Bear,
}

impl ScoreRegime {
    /// Score multiplier for this regime. Exact by specification.
    pub fn multiplier(self) -> f64 {
        match self {
            Self::Bull => 1.20,
            Self::Neutral => 1.00,
            Self::Bear => 0.80,
        }
    }

    /// Dynamic entry/exit thresholds `(entry, exit)` for this regime.
    pub fn thresholds(self) -> (f64, f64) {
        match self {
            Self::Bull => (28.0, 18.0),
            Self::Neutral => (32.0, 22.0),
            Self::Bear => (36.0, 30.0),
        }
    }
}

impl std::fmt::Display for ScoreRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bull => write!(f, "BULL"),
            Self::Neutral => write!(f, "NEUTRAL"),
            Self::Bear => write!(f, "BEAR"),
        }
    }
}

/// Net direction of liquidity migration across bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationDirection {
    In,
    Out,
    Neutral,
}

impl std::fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::In => write!(f, "in"),
            Self::Out => write!(f, "out"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

// ---------------------------------------------------------------------------
// Bin width recommendation
// ---------------------------------------------------------------------------

/// Recommended symmetric bin range around the active bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinWidthConfig {
    pub min_bins: u32,
    pub max_bins: u32,
}

impl BinWidthConfig {
    /// Width band for a composite score: strong pools get tight ranges that
    /// concentrate fees, weak pools get wide ranges that survive drift.
    pub fn for_score(score: f64) -> Self {
        if score > 45.0 {
            Self {
                min_bins: 5,
                max_bins: 12,
            }
        } else if score > 35.0 {
            Self {
                min_bins: 8,
                max_bins: 18,
            }
        } else {
            Self {
                min_bins: 12,
                max_bins: 26,
            }
        }
    }

    /// Concrete width drawn from the band (midpoint).
    pub fn width(&self) -> u32 {
        (self.min_bins + self.max_bins) / 2
    }
}

// ---------------------------------------------------------------------------
// Score record
// ---------------------------------------------------------------------------

/// The five pillar scores, each in [0, 100].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PillarScores {
    pub bin_velocity: f64,
    pub swap_velocity: f64,
    pub liquidity_flow: f64,
    pub fee_intensity: f64,
    pub entropy: f64,
}

/// Full record of one pool's composite score for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tier4Score {
    pub pool: String,

    pub pillars: PillarScores,

    // Raw values retained for gate checks and audit.
    pub raw_bin_velocity: f64,
    pub raw_swap_velocity: f64,
    pub raw_fee_intensity: f64,
    pub pool_entropy: f64,

    pub slopes: MomentumSlopes,

    pub regime: ScoreRegime,
    pub migration: MigrationDirection,
    /// True when a sharp migration reversal zeroed the multiplier.
    pub migration_blocked: bool,

    pub regime_multiplier: f64,
    pub migration_multiplier: f64,
    pub slope_multiplier: f64,
    pub time_weight_multiplier: f64,
    /// False while the 30-minute consistency buffer is underfilled.
    pub time_weight_healthy: bool,

    pub base_score: f64,
    pub tier4_score: f64,

    pub entry_threshold: f64,
    pub exit_threshold: f64,

    pub bin_width: BinWidthConfig,

    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Always false for telemetry-derived scores; the bootstrap scorer tags
    /// its records true so the two are never silently averaged together.
    pub is_bootstrap: bool,
}

impl Tier4Score {
    /// An invalid placeholder score for a pool with no usable telemetry.
    pub fn invalid(pool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            pillars: PillarScores::default(),
            raw_bin_velocity: 0.0,
            raw_swap_velocity: 0.0,
            raw_fee_intensity: 0.0,
            pool_entropy: 0.0,
            slopes: MomentumSlopes::default(),
            regime: ScoreRegime::Neutral,
            migration: MigrationDirection::Neutral,
            migration_blocked: false,
            regime_multiplier: 1.0,
            migration_multiplier: 1.0,
            slope_multiplier: 1.0,
            time_weight_multiplier: 1.0,
            time_weight_healthy: false,
            base_score: 0.0,
            tier4_score: 0.0,
            entry_threshold: ScoreRegime::Neutral.thresholds().0,
            exit_threshold: ScoreRegime::Neutral.thresholds().1,
            bin_width: BinWidthConfig::for_score(0.0),
            valid: false,
            reason: Some(reason.into()),
            is_bootstrap: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Stateful composite scorer. The only state is the last observed migration
/// direction per pool, needed for reversal detection.
pub struct Tier4Scorer {
    last_migration: RwLock<HashMap<String, MigrationDirection>>,
}

impl Tier4Scorer {
    pub fn new() -> Self {
        Self {
            last_migration: RwLock::new(HashMap::new()),
        }
    }

    /// Score one pool from its metrics, slopes, and time-weight state.
    pub fn score(
        &self,
        pool: &str,
        metrics: &MicrostructureMetrics,
        slopes: &MomentumSlopes,
        time_weight: &TimeWeightResult,
    ) -> Tier4Score {
        // --- Pillars ---------------------------------------------------------
        let entropy_pillar =
            ((metrics.pool_entropy / ENTROPY_TARGET) * 100.0).clamp(0.0, 100.0);
        let pillars = PillarScores {
            bin_velocity: metrics.bin_velocity,
            swap_velocity: metrics.swap_velocity,
            liquidity_flow: metrics.liquidity_flow,
            fee_intensity: metrics.fee_intensity,
            entropy: entropy_pillar,
        };

        let base_score = pillars.bin_velocity * WEIGHT_BIN_VELOCITY
            + pillars.swap_velocity * WEIGHT_SWAP_VELOCITY
            + pillars.liquidity_flow * WEIGHT_LIQUIDITY_FLOW
            + pillars.fee_intensity * WEIGHT_FEE_INTENSITY
            + pillars.entropy * WEIGHT_ENTROPY;

        // --- Regime ----------------------------------------------------------
        let regime = classify_regime(metrics.signed_bin_velocity, slopes.liquidity_slope);
        let regime_multiplier = regime.multiplier();

        // --- Migration -------------------------------------------------------
        let (migration, migration_blocked) =
            self.evaluate_migration(pool, slopes.liquidity_slope);
        let migration_multiplier = if migration_blocked { 0.0 } else { 1.0 };

        // --- Slope multiplier ------------------------------------------------
        let slope_multiplier = if slopes.valid {
            slope_multiplier(slopes)
        } else {
            1.0
        };

        // --- Time weight -----------------------------------------------------
        let time_weight_multiplier = if time_weight.healthy {
            time_weight.multiplier
        } else {
            1.0
        };

        // --- Composite -------------------------------------------------------
        let tier4_score = (base_score
            * regime_multiplier
            * migration_multiplier
            * slope_multiplier
            * time_weight_multiplier)
            .max(0.0);

        let (entry_threshold, exit_threshold) = regime.thresholds();
        let bin_width = BinWidthConfig::for_score(tier4_score);

        debug!(
            pool,
            base = format!("{:.1}", base_score),
            tier4 = format!("{:.1}", tier4_score),
            regime = %regime,
            migration = %migration,
            blocked = migration_blocked,
            slope_mult = format!("{:.3}", slope_multiplier),
            tw_mult = format!("{:.3}", time_weight_multiplier),
            "tier4 score computed"
        );

        Tier4Score {
            pool: pool.to_string(),
            pillars,
            raw_bin_velocity: metrics.raw_bin_velocity,
            raw_swap_velocity: metrics.raw_swap_velocity,
            raw_fee_intensity: metrics.raw_fee_intensity,
            pool_entropy: metrics.pool_entropy,
            slopes: *slopes,
            regime,
            migration,
            migration_blocked,
            regime_multiplier,
            migration_multiplier,
            slope_multiplier,
            time_weight_multiplier,
            time_weight_healthy: time_weight.healthy,
            base_score,
            tier4_score,
            entry_threshold,
            exit_threshold,
            bin_width,
            valid: true,
            reason: None,
            is_bootstrap: false,
        }
    }

    /// Classify migration direction and detect a sharp reversal against the
    /// previously observed direction for this pool.
    fn evaluate_migration(&self, pool: &str, slope_per_min: f64) -> (MigrationDirection, bool) {
        let direction = if slope_per_min > MIGRATION_SLOPE_PER_MIN {
            MigrationDirection::In
        } else if slope_per_min < -MIGRATION_SLOPE_PER_MIN {
            MigrationDirection::Out
        } else {
            MigrationDirection::Neutral
        };

        let previous = {
            let map = self.last_migration.read();
            map.get(pool).copied()
        };

        let blocked = match previous {
            Some(MigrationDirection::In) => slope_per_min < -MIGRATION_SLOPE_PER_MIN,
            Some(MigrationDirection::Out) => slope_per_min > MIGRATION_SLOPE_PER_MIN,
            _ => false,
        };

        self.last_migration
            .write()
            .insert(pool.to_string(), direction);

        (direction, blocked)
    }

    /// Forget migration state for a pool that left the universe.
    pub fn drop_pool(&self, pool: &str) {
        self.last_migration.write().remove(pool);
    }
}

impl Default for Tier4Scorer {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// BULL on upward bin drift or liquidity inflow; BEAR on the inverse;
/// NEUTRAL otherwise. Rules are evaluated in order, first match wins.
fn classify_regime(signed_bin_velocity: f64, liquidity_slope: f64) -> ScoreRegime {
    if signed_bin_velocity > 0.05 || liquidity_slope > 0.0 {
        return ScoreRegime::Bull;
    }
    if signed_bin_velocity < 0.0 || liquidity_slope < 0.0 {
        return ScoreRegime::Bear;
    }
    ScoreRegime::Neutral
}

/// Additive slope multiplier, clamped to [0.75, 1.35].
fn slope_multiplier(slopes: &MomentumSlopes) -> f64 {
    let vel = (slopes.velocity_slope / 50.0).clamp(-0.10, 0.10);
    let liq = (slopes.liquidity_slope / 50.0).clamp(-0.10, 0.15);
    let ent = (slopes.entropy_slope / 50.0).clamp(-0.05, 0.10);
    (1.0 + vel + liq + ent).clamp(0.75, 1.35)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(
        signed_bin_velocity: f64,
        raw_swap_velocity: f64,
        pool_entropy: f64,
    ) -> MicrostructureMetrics {
        MicrostructureMetrics {
            bin_velocity: ((signed_bin_velocity.abs() / 0.05) * 100.0).clamp(0.0, 100.0),
            swap_velocity: ((raw_swap_velocity / 0.30) * 100.0).clamp(0.0, 100.0),
            liquidity_flow: 50.0,
            fee_intensity: 60.0,
            raw_bin_velocity: signed_bin_velocity.abs(),
            signed_bin_velocity,
            raw_swap_velocity,
            raw_liquidity_flow: 0.05,
            signed_liquidity_flow: 0.05,
            raw_fee_intensity: 0.0006,
            pool_entropy,
            is_market_alive: true,
            gating_reasons: Vec::new(),
            window_start: 0,
            window_end: 10_000,
        }
    }

    fn slopes(velocity: f64, liquidity: f64, entropy: f64) -> MomentumSlopes {
        MomentumSlopes {
            velocity_slope: velocity,
            liquidity_slope: liquidity,
            entropy_slope: entropy,
            valid: true,
        }
    }

    fn neutral_time_weight() -> TimeWeightResult {
        TimeWeightResult {
            multiplier: 1.0,
            consistency: 1.0,
            spike_ratio: 0.0,
            healthy: true,
            samples: 10,
        }
    }

    #[test]
    fn test_regime_multipliers_exact() {
        assert!((ScoreRegime::Bull.multiplier() - 1.20).abs() < f64::EPSILON);
        assert!((ScoreRegime::Neutral.multiplier() - 1.00).abs() < f64::EPSILON);
        assert!((ScoreRegime::Bear.multiplier() - 0.80).abs() < f64::EPSILON);
    }

    #[test]
    fn test_regime_classification_order() {
        assert_eq!(classify_regime(0.08, 0.0), ScoreRegime::Bull);
        assert_eq!(classify_regime(0.0, 0.5), ScoreRegime::Bull);
        // Bull rule wins even with negative liquidity slope when drift is strong.
        assert_eq!(classify_regime(0.08, -0.5), ScoreRegime::Bull);
        assert_eq!(classify_regime(-0.01, 0.0), ScoreRegime::Bear);
        assert_eq!(classify_regime(0.0, -0.5), ScoreRegime::Bear);
        assert_eq!(classify_regime(0.0, 0.0), ScoreRegime::Neutral);
        assert_eq!(classify_regime(0.03, 0.0), ScoreRegime::Neutral);
    }

    #[test]
    fn test_slope_multiplier_bounds() {
        // Extremely negative slopes floor at 0.75.
        let m = slope_multiplier(&slopes(-1_000.0, -1_000.0, -1_000.0));
        assert!((m - 0.75).abs() < f64::EPSILON);
        // Extremely positive slopes cap at 1.35.
        let m = slope_multiplier(&slopes(1_000.0, 1_000.0, 1_000.0));
        assert!((m - 1.35).abs() < f64::EPSILON);
        // Zero slopes are exactly neutral.
        let m = slope_multiplier(&slopes(0.0, 0.0, 0.0));
        assert!((m - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_composite_identity() {
        let scorer = Tier4Scorer::new();
        let m = metrics(0.02, 0.15, 0.60);
        let s = slopes(0.5, 0.2, 0.001);
        let record = scorer.score("pool", &m, &s, &neutral_time_weight());

        let expected = record.base_score
            * record.regime_multiplier
            * record.migration_multiplier
            * record.slope_multiplier
            * record.time_weight_multiplier;
        assert!(
            (record.tier4_score - expected).abs() < 1e-9,
            "tier4 must equal the product of base and multipliers"
        );
        assert!(record.tier4_score >= 0.0);
        // Upper bound: 100 x 1.20 x 1.0 x 1.35 x 1.20.
        assert!(record.tier4_score <= 100.0 * 1.20 * 1.35 * 1.20);
    }

    #[test]
    fn test_strong_uptrend_scenario() {
        // Bin drift 0.08/s, swaps 0.25/s, liquidity inflow +0.5/min,
        // entropy 0.72 — expect BULL, migration in, admissible score.
        let scorer = Tier4Scorer::new();
        let m = metrics(0.08, 0.25, 0.72);
        let s = slopes(0.5, 0.5, 0.001);
        let record = scorer.score("pool", &m, &s, &neutral_time_weight());

        assert_eq!(record.regime, ScoreRegime::Bull);
        assert_eq!(record.migration, MigrationDirection::In);
        assert!(!record.migration_blocked);
        assert!(record.slope_multiplier > 1.0);
        assert!(
            record.tier4_score >= 28.0,
            "strong uptrend must clear the BULL entry threshold, got {:.1}",
            record.tier4_score
        );
        assert!((record.entry_threshold - 28.0).abs() < f64::EPSILON);
        assert!((record.exit_threshold - 18.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_migration_exactly_at_boundary_is_neutral() {
        let scorer = Tier4Scorer::new();
        let m = metrics(0.0, 0.15, 0.70);

        let record = scorer.score("p", &m, &slopes(0.0, 0.40, 0.0), &neutral_time_weight());
        assert_eq!(record.migration, MigrationDirection::Neutral);

        let record = scorer.score("p", &m, &slopes(0.0, -0.40, 0.0), &neutral_time_weight());
        assert_eq!(record.migration, MigrationDirection::Neutral);
    }

    #[test]
    fn test_migration_reversal_blocks() {
        let scorer = Tier4Scorer::new();
        let m = metrics(0.0, 0.15, 0.70);

        // Cycle 1: strong inflow establishes direction "in".
        let r1 = scorer.score("p", &m, &slopes(0.0, 0.5, 0.0), &neutral_time_weight());
        assert_eq!(r1.migration, MigrationDirection::In);
        assert!(!r1.migration_blocked);

        // Cycle 2: sharp reversal to -0.45/min fires the block.
        let r2 = scorer.score("p", &m, &slopes(0.0, -0.45, 0.0), &neutral_time_weight());
        assert_eq!(r2.migration, MigrationDirection::Out);
        assert!(r2.migration_blocked);
        assert!((r2.migration_multiplier - 0.0).abs() < f64::EPSILON);
        assert!((r2.tier4_score - 0.0).abs() < f64::EPSILON);

        // Cycle 3: sustained outflow is no longer a reversal.
        let r3 = scorer.score("p", &m, &slopes(0.0, -0.45, 0.0), &neutral_time_weight());
        assert!(!r3.migration_blocked);
    }

    #[test]
    fn test_unhealthy_time_weight_scores_with_unit_multiplier() {
        let scorer = Tier4Scorer::new();
        let m = metrics(0.02, 0.15, 0.70);
        let tw = TimeWeightResult::default();
        assert!(!tw.healthy);

        let record = scorer.score("p", &m, &slopes(0.0, 0.0, 0.0), &tw);
        assert!((record.time_weight_multiplier - 1.0).abs() < f64::EPSILON);
        assert!(!record.time_weight_healthy);
        assert!(record.valid);
    }

    #[test]
    fn test_bin_width_bands() {
        assert_eq!(
            BinWidthConfig::for_score(50.0),
            BinWidthConfig {
                min_bins: 5,
                max_bins: 12
            }
        );
        assert_eq!(
            BinWidthConfig::for_score(40.0),
            BinWidthConfig {
                min_bins: 8,
                max_bins: 18
            }
        );
        assert_eq!(
            BinWidthConfig::for_score(20.0),
            BinWidthConfig {
                min_bins: 12,
                max_bins: 26
            }
        );
        assert_eq!(BinWidthConfig::for_score(50.0).width(), 8);
    }

    #[test]
    fn test_invalid_score_is_tagged() {
        let record = Tier4Score::invalid("p", "history too short");
        assert!(!record.valid);
        assert!(!record.is_bootstrap);
        assert_eq!(record.reason.as_deref(), Some("history too short"));
        assert!((record.tier4_score - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_entropy_pillar_normalised_against_target() {
        let scorer = Tier4Scorer::new();
        // Entropy 0.35 = half the 0.70 target -> pillar 50.
        let m = metrics(0.0, 0.15, 0.35);
        let record = scorer.score("p", &m, &slopes(0.0, 0.0, 0.0), &neutral_time_weight());
        assert!((record.pillars.entropy - 50.0).abs() < 1e-9);
    }
}
