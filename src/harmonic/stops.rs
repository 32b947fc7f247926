// =============================================================================
// Harmonic Stops — per-position microstructure health controller
// =============================================================================
//
// On registration each position stores an immutable baseline observation of
// the pool's microstructure at entry. Every cycle the current observation
// is scored against that baseline across five components, each in [0, 1]:
//
//   velocity   (currentBinV + currentSwapV) / (baselineBinV + baselineSwapV),
//              interpolated from the tier's drop factor up to 1
//   entropy    current / baseline entropy, interpolated the same way
//   liquidity  1.0 on inflow; interpolated to 0 at the tier's outflow floor
//   slope      average of three slope healths (1 when positive, 0 at the
//              tier's maximum-negative floor)
//   floors     1.0 with no absolute-floor violations, -0.30 per violation,
//              floored at 0
//
// The weighted sum is the health score. A sample is bad when the health
// score drops below the tier minimum or when two or more absolute floors
// are violated simultaneously.
//
// Consecutive-bad-sample counter rules:
//   freeze — an outer suppression policy can freeze the counter; frozen
//            samples are observed but do not accrue
//   cap    — the counter never exceeds minBadSamples + 1, so a long
//            suppression cannot bank an instant exit
//   reset  — one healthy sample resets the counter to zero and unfreezes
//
// FULL_EXIT fires when the counter reaches the tier's minBadSamples. Within
// the grace period after entry the controller always holds.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::microstructure::{MicrostructureMetrics, MomentumSlopes};
use crate::risk::RiskTier;
use crate::runtime_config::HarmonicParams;

/// Health deduction per violated absolute floor.
const FLOOR_VIOLATION_PENALTY: f64 = 0.30;

/// Floor violations that mark a sample bad regardless of the health score.
const BAD_SAMPLE_FLOOR_VIOLATIONS: u32 = 2;

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// Raw microstructure readings used for baseline comparison.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MicroObservation {
    pub bin_velocity: f64,
    pub swap_velocity: f64,
    pub entropy: f64,
    pub fee_intensity: f64,
    pub liquidity_usd: f64,
}

impl MicroObservation {
    /// Build an observation from the metrics pipeline plus the pool's TVL.
    pub fn from_metrics(metrics: &MicrostructureMetrics, liquidity_usd: f64) -> Self {
        Self {
            bin_velocity: metrics.raw_bin_velocity,
            swap_velocity: metrics.raw_swap_velocity,
            entropy: metrics.pool_entropy,
            fee_intensity: metrics.raw_fee_intensity,
            liquidity_usd,
        }
    }
}

/// Immutable snapshot of microstructure at position entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HarmonicBaseline {
    pub observation: MicroObservation,
    pub captured_at_ms: i64,
}

// ---------------------------------------------------------------------------
// Tier tolerance
// ---------------------------------------------------------------------------

/// Tier-dependent tolerance. Tier A is permissive (strong pools earn wider
/// health bands and more bad samples before exit); tier C is tight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierTolerance {
    /// Velocity ratio at which velocity health reaches 0.
    pub velocity_drop_factor: f64,
    /// Entropy ratio at which entropy health reaches 0.
    pub entropy_drop_factor: f64,
    /// Liquidity outflow fraction at which liquidity health reaches 0.
    pub liquidity_outflow_pct: f64,
    /// Per-minute slope floors (health 0 at these values).
    pub max_neg_velocity_slope: f64,
    pub max_neg_liquidity_slope: f64,
    pub max_neg_entropy_slope: f64,
    /// Absolute floors on the raw readings.
    pub min_bin_velocity: f64,
    pub min_swap_velocity: f64,
    pub min_entropy: f64,
    pub min_fee_intensity: f64,
    /// Health score below which a sample is bad.
    pub min_health_score: f64,
    /// Consecutive bad samples required for FULL_EXIT.
    pub min_bad_samples: u32,
}

impl TierTolerance {
    pub fn for_tier(tier: RiskTier) -> Self {
        match tier {
            RiskTier::A => Self {
                velocity_drop_factor: 0.35,
                entropy_drop_factor: 0.40,
                liquidity_outflow_pct: 0.30,
                max_neg_velocity_slope: -0.50,
                max_neg_liquidity_slope: -0.30,
                max_neg_entropy_slope: -0.20,
                min_bin_velocity: 0.010,
                min_swap_velocity: 0.04,
                min_entropy: 0.30,
                min_fee_intensity: 0.0001,
                min_health_score: 0.40,
                min_bad_samples: 4,
            },
            RiskTier::B => Self {
                velocity_drop_factor: 0.45,
                entropy_drop_factor: 0.50,
                liquidity_outflow_pct: 0.25,
                max_neg_velocity_slope: -0.40,
                max_neg_liquidity_slope: -0.25,
                max_neg_entropy_slope: -0.15,
                min_bin_velocity: 0.015,
                min_swap_velocity: 0.05,
                min_entropy: 0.35,
                min_fee_intensity: 0.00015,
                min_health_score: 0.45,
                min_bad_samples: 3,
            },
            // C and the (never deployed) D share the tightest policy.
            RiskTier::C | RiskTier::D => Self {
                velocity_drop_factor: 0.55,
                entropy_drop_factor: 0.60,
                liquidity_outflow_pct: 0.20,
                max_neg_velocity_slope: -0.30,
                max_neg_liquidity_slope: -0.20,
                max_neg_entropy_slope: -0.10,
                min_bin_velocity: 0.020,
                min_swap_velocity: 0.06,
                min_entropy: 0.40,
                min_fee_intensity: 0.0002,
                min_health_score: 0.50,
                min_bad_samples: 2,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Decisions & errors
// ---------------------------------------------------------------------------

/// Verdict for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopAction {
    Hold,
    FullExit,
}

impl std::fmt::Display for StopAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hold => write!(f, "HOLD"),
            Self::FullExit => write!(f, "FULL_EXIT"),
        }
    }
}

/// Per-component health breakdown.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HealthComponents {
    pub velocity: f64,
    pub entropy: f64,
    pub liquidity: f64,
    pub slope: f64,
    pub floors: f64,
}

/// Full evaluation result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HarmonicDecision {
    pub action: StopAction,
    pub health_score: f64,
    pub components: HealthComponents,
    pub floor_violations: u32,
    pub consecutive_bad_samples: u32,
    pub frozen: bool,
    /// True while the grace period suppresses evaluation.
    pub in_grace: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HarmonicError {
    /// Registering a trade id twice corrupts baseline immutability.
    DuplicateRegistration(String),
    /// Evaluating or freezing a trade that was never registered.
    Unregistered(String),
}

impl std::fmt::Display for HarmonicError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateRegistration(id) => {
                write!(f, "harmonic state already registered for trade {id}")
            }
            Self::Unregistered(id) => write!(f, "no harmonic state for trade {id}"),
        }
    }
}

impl std::error::Error for HarmonicError {}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct HarmonicState {
    baseline: HarmonicBaseline,
    tier: RiskTier,
    entry_timestamp_ms: i64,
    consecutive_bad_samples: u32,
    last_check_ms: i64,
    last_health_score: f64,
    bad_samples_frozen: bool,
    freeze_applied_at_ms: Option<i64>,
}

// ---------------------------------------------------------------------------
// HarmonicStops
// ---------------------------------------------------------------------------

/// Thread-safe owner of all per-position harmonic state, keyed by trade id.
pub struct HarmonicStops {
    params: HarmonicParams,
    states: RwLock<HashMap<String, HarmonicState>>,
}

impl HarmonicStops {
    pub fn new(params: HarmonicParams) -> Self {
        Self {
            params,
            states: RwLock::new(HashMap::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Registration & lifecycle
    // -------------------------------------------------------------------------

    /// Register a new position's baseline. Fails on duplicate trade ids —
    /// the baseline is immutable for the life of the position.
    pub fn register(
        &self,
        trade_id: &str,
        tier: RiskTier,
        baseline: HarmonicBaseline,
        entry_timestamp_ms: i64,
    ) -> Result<(), HarmonicError> {
        let mut states = self.states.write();
        if states.contains_key(trade_id) {
            return Err(HarmonicError::DuplicateRegistration(trade_id.to_string()));
        }
        states.insert(
            trade_id.to_string(),
            HarmonicState {
                baseline,
                tier,
                entry_timestamp_ms,
                consecutive_bad_samples: 0,
                last_check_ms: entry_timestamp_ms,
                last_health_score: 1.0,
                bad_samples_frozen: false,
                freeze_applied_at_ms: None,
            },
        );
        debug!(trade_id, %tier, "harmonic baseline registered");
        Ok(())
    }

    /// Release the state for a closed position.
    pub fn release(&self, trade_id: &str) {
        if self.states.write().remove(trade_id).is_some() {
            debug!(trade_id, "harmonic state released");
        }
    }

    /// Freeze the bad-sample counter (outer suppression policy).
    pub fn freeze(&self, trade_id: &str, now_ms: i64) -> Result<(), HarmonicError> {
        let mut states = self.states.write();
        let state = states
            .get_mut(trade_id)
            .ok_or_else(|| HarmonicError::Unregistered(trade_id.to_string()))?;
        if !state.bad_samples_frozen {
            state.bad_samples_frozen = true;
            state.freeze_applied_at_ms = Some(now_ms);
            info!(trade_id, "harmonic bad-sample counter frozen");
        }
        Ok(())
    }

    /// Lift a freeze without waiting for a healthy sample.
    pub fn unfreeze(&self, trade_id: &str) -> Result<(), HarmonicError> {
        let mut states = self.states.write();
        let state = states
            .get_mut(trade_id)
            .ok_or_else(|| HarmonicError::Unregistered(trade_id.to_string()))?;
        state.bad_samples_frozen = false;
        state.freeze_applied_at_ms = None;
        Ok(())
    }

    /// Trade ids with live harmonic state.
    pub fn registered_trades(&self) -> Vec<String> {
        self.states.read().keys().cloned().collect()
    }

    // -------------------------------------------------------------------------
    // Evaluation
    // -------------------------------------------------------------------------

    /// Evaluate one position against the current microstructure.
    pub fn evaluate(
        &self,
        trade_id: &str,
        current: &MicroObservation,
        slopes: &MomentumSlopes,
        now_ms: i64,
    ) -> Result<HarmonicDecision, HarmonicError> {
        let mut states = self.states.write();
        let state = states
            .get_mut(trade_id)
            .ok_or_else(|| HarmonicError::Unregistered(trade_id.to_string()))?;

        let tolerance = TierTolerance::for_tier(state.tier);
        state.last_check_ms = now_ms;

        // ── 1. Grace period ──────────────────────────────────────────────
        if now_ms - state.entry_timestamp_ms < self.params.min_hold_time_ms as i64 {
            return Ok(HarmonicDecision {
                action: StopAction::Hold,
                health_score: state.last_health_score,
                components: HealthComponents::default(),
                floor_violations: 0,
                consecutive_bad_samples: state.consecutive_bad_samples,
                frozen: state.bad_samples_frozen,
                in_grace: true,
            });
        }

        // ── 2. Component healths ─────────────────────────────────────────
        let baseline = &state.baseline.observation;

        let velocity = ratio_health(
            current.bin_velocity + current.swap_velocity,
            baseline.bin_velocity + baseline.swap_velocity,
            tolerance.velocity_drop_factor,
        );

        let entropy = ratio_health(
            current.entropy,
            baseline.entropy,
            tolerance.entropy_drop_factor,
        );

        let liquidity = liquidity_health(
            current.liquidity_usd,
            baseline.liquidity_usd,
            tolerance.liquidity_outflow_pct,
        );

        let slope = (slope_health(slopes.velocity_slope, tolerance.max_neg_velocity_slope)
            + slope_health(slopes.liquidity_slope, tolerance.max_neg_liquidity_slope)
            + slope_health(slopes.entropy_slope, tolerance.max_neg_entropy_slope))
            / 3.0;

        let floor_violations = count_floor_violations(current, &tolerance);
        let floors =
            (1.0 - FLOOR_VIOLATION_PENALTY * floor_violations as f64).max(0.0);

        let components = HealthComponents {
            velocity,
            entropy,
            liquidity,
            slope,
            floors,
        };

        // ── 3. Combined health ───────────────────────────────────────────
        let w = &self.params.weights;
        let health_score = velocity * w.velocity
            + entropy * w.entropy
            + liquidity * w.liquidity
            + slope * w.slope
            + floors * w.floors;
        state.last_health_score = health_score;

        // ── 4. Bad-sample classification ─────────────────────────────────
        let is_bad = health_score < tolerance.min_health_score
            || floor_violations >= BAD_SAMPLE_FLOOR_VIOLATIONS;

        // ── 5. Counter rules: freeze, cap, reset ─────────────────────────
        if is_bad {
            if !state.bad_samples_frozen {
                let cap = tolerance.min_bad_samples + 1;
                state.consecutive_bad_samples =
                    (state.consecutive_bad_samples + 1).min(cap);
            }
        } else {
            state.consecutive_bad_samples = 0;
            state.bad_samples_frozen = false;
            state.freeze_applied_at_ms = None;
        }

        // ── 6. Exit decision ─────────────────────────────────────────────
        let action = if state.consecutive_bad_samples >= tolerance.min_bad_samples {
            StopAction::FullExit
        } else {
            StopAction::Hold
        };

        if action == StopAction::FullExit {
            warn!(
                trade_id,
                tier = %state.tier,
                health = format!("{:.3}", health_score),
                bad_samples = state.consecutive_bad_samples,
                floor_violations,
                "harmonic stop: FULL_EXIT"
            );
        } else {
            debug!(
                trade_id,
                health = format!("{:.3}", health_score),
                bad_samples = state.consecutive_bad_samples,
                bad = is_bad,
                frozen = state.bad_samples_frozen,
                "harmonic sample evaluated"
            );
        }

        Ok(HarmonicDecision {
            action,
            health_score,
            components,
            floor_violations,
            consecutive_bad_samples: state.consecutive_bad_samples,
            frozen: state.bad_samples_frozen,
            in_grace: false,
        })
    }
}

impl std::fmt::Debug for HarmonicStops {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarmonicStops")
            .field("positions", &self.states.read().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Interpolated health for a current/baseline ratio: 1 at or above parity,
/// 0 at or below the drop factor.
fn ratio_health(current: f64, baseline: f64, drop_factor: f64) -> f64 {
    if baseline <= 0.0 {
        return 1.0;
    }
    let ratio = current / baseline;
    ((ratio - drop_factor) / (1.0 - drop_factor)).clamp(0.0, 1.0)
}

/// 1.0 on inflow or flat; interpolates to 0 at the outflow floor.
fn liquidity_health(current_usd: f64, baseline_usd: f64, outflow_floor: f64) -> f64 {
    if baseline_usd <= 0.0 {
        return 1.0;
    }
    let outflow = (baseline_usd - current_usd) / baseline_usd;
    if outflow <= 0.0 {
        return 1.0;
    }
    (1.0 - outflow / outflow_floor).clamp(0.0, 1.0)
}

/// 1.0 for non-negative slopes; interpolates to 0 at the maximum-negative
/// floor.
fn slope_health(slope: f64, max_negative: f64) -> f64 {
    if slope >= 0.0 {
        return 1.0;
    }
    (1.0 - slope / max_negative).clamp(0.0, 1.0)
}

fn count_floor_violations(obs: &MicroObservation, tolerance: &TierTolerance) -> u32 {
    let mut violations = 0;
    if obs.bin_velocity < tolerance.min_bin_velocity {
        violations += 1;
    }
    if obs.swap_velocity < tolerance.min_swap_velocity {
        violations += 1;
    }
    if obs.entropy < tolerance.min_entropy {
        violations += 1;
    }
    if obs.fee_intensity < tolerance.min_fee_intensity {
        violations += 1;
    }
    violations
}
