// =============================================================================
// Macro Regime Classifier
// =============================================================================
//
// Classifies the whole operator's market into one of five regimes from
// aggregated, market-wide signals. Each regime carries playbook parameters
// (sizing, hold windows, cooldowns) so downstream modules adapt
// automatically.
//
// Detection hierarchy (evaluated top-to-bottom; first match wins):
//
//   1. CHAOS          — aggregate entropy >= 0.90 (structureless churn)
//   2. HIGH_VELOCITY  — aggregate velocity > 70 on the pillar scale
//   3. TREND          — positive velocity and liquidity slopes with
//                       consistent flow (consistency >= 0.50)
//   4. CHOP           — inconsistent flow (consistency < 0.35) with
//                       elevated entropy (>= 0.75)
//   5. NEUTRAL        — nothing else fires
//
// When a proposal would switch away from the current regime, the governor
// widens each rule boundary by the hysteresis band, so flips require the
// signal to clear the boundary with margin.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::runtime_config::HysteresisParams;

// =============================================================================
// Types
// =============================================================================

/// High-level market regime for the whole operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MacroRegime {
    /// Persistent directional flow — extend holds, allow stacking.
    Trend,
    /// Inconsistent, churning flow — shrink size and holds.
    Chop,
    /// Structureless churn — exit everything and stand down.
    Chaos,
    /// No strong signal either way.
    Neutral,
    /// Fast but orderly markets — normal size, short holds.
    HighVelocity,
}

impl std::fmt::Display for MacroRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trend => write!(f, "TREND"),
            Self::Chop => write!(f, "CHOP"),
            Self::Chaos => write!(f, "CHAOS"),
            Self::Neutral => write!(f, "NEUTRAL"),
            Self::HighVelocity => write!(f, "HIGH_VELOCITY"),
        }
    }
}

/// Aggregated market-wide inputs to the classifier. Velocity lives on the
/// 0-100 pillar scale; entropy, consistency, migration confidence, and
/// execution quality on [0, 1]; slopes per minute.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MacroSignals {
    pub velocity_slope: f64,
    pub liquidity_slope: f64,
    pub entropy_slope: f64,
    pub entropy_level: f64,
    pub velocity: f64,
    pub migration_confidence: f64,
    pub consistency: f64,
    pub fee_intensity: f64,
    pub execution_quality: f64,
}

// =============================================================================
// Rule boundaries
// =============================================================================

const CHAOS_ENTROPY: f64 = 0.90;
const HIGH_VELOCITY_MIN: f64 = 70.0;
const TREND_MIN_VELOCITY_SLOPE: f64 = 0.005;
const TREND_MIN_CONSISTENCY: f64 = 0.50;
const CHOP_MAX_CONSISTENCY: f64 = 0.35;
const CHOP_MIN_ENTROPY: f64 = 0.75;

// =============================================================================
// Classification
// =============================================================================

/// Classify the signals into a proposed regime with a confidence score.
///
/// `current` is the regime currently in force; rules whose target differs
/// from it are tightened by the hysteresis bands so that a switch requires
/// clearing the boundary plus the buffer.
pub fn classify(
    signals: &MacroSignals,
    current: MacroRegime,
    bands: &HysteresisParams,
) -> (MacroRegime, f64) {
    // Band applied only when the rule would move us to a different regime.
    let band = |target: MacroRegime, buffer: f64| -> f64 {
        if target == current {
            0.0
        } else {
            buffer
        }
    };

    // 1. CHAOS — entropy dominates everything else.
    let chaos_gate = CHAOS_ENTROPY + band(MacroRegime::Chaos, bands.entropy_band);
    if signals.entropy_level >= chaos_gate {
        let confidence = remap(signals.entropy_level, chaos_gate, 1.0, 0.70, 1.0);
        return (MacroRegime::Chaos, confidence);
    }

    // 2. HIGH_VELOCITY — fast but not structureless.
    let hv_gate = HIGH_VELOCITY_MIN + band(MacroRegime::HighVelocity, bands.velocity_band);
    if signals.velocity > hv_gate {
        let confidence = remap(signals.velocity, hv_gate, 100.0, 0.60, 1.0);
        return (MacroRegime::HighVelocity, confidence);
    }

    // 3. TREND — directional slopes with consistent flow.
    let trend_slope_gate =
        TREND_MIN_VELOCITY_SLOPE + band(MacroRegime::Trend, bands.slope_band);
    let trend_consistency_gate =
        TREND_MIN_CONSISTENCY + band(MacroRegime::Trend, bands.consistency_band);
    if signals.velocity_slope > trend_slope_gate
        && signals.liquidity_slope > 0.0
        && signals.consistency >= trend_consistency_gate
    {
        let slope_conf = remap(signals.velocity_slope, trend_slope_gate, 0.10, 0.60, 1.0);
        let cons_conf = remap(signals.consistency, trend_consistency_gate, 1.0, 0.60, 1.0);
        let confidence = (slope_conf + cons_conf) / 2.0;
        return (MacroRegime::Trend, confidence);
    }

    // 4. CHOP — churning, inconsistent flow.
    let chop_consistency_gate =
        CHOP_MAX_CONSISTENCY - band(MacroRegime::Chop, bands.consistency_band);
    let chop_entropy_gate = CHOP_MIN_ENTROPY + band(MacroRegime::Chop, bands.entropy_band);
    if signals.consistency < chop_consistency_gate && signals.entropy_level >= chop_entropy_gate {
        let cons_conf = remap(signals.consistency, chop_consistency_gate, 0.0, 0.50, 1.0);
        let ent_conf = remap(signals.entropy_level, chop_entropy_gate, 1.0, 0.50, 1.0);
        let confidence = (cons_conf + ent_conf) / 2.0;
        return (MacroRegime::Chop, confidence);
    }

    // 5. NEUTRAL — default.
    trace!(
        entropy = format!("{:.3}", signals.entropy_level),
        velocity = format!("{:.1}", signals.velocity),
        consistency = format!("{:.3}", signals.consistency),
        "regime: no rule matched, defaulting to NEUTRAL"
    );
    (MacroRegime::Neutral, 0.30)
}

/// Linearly remap `value` from `[in_lo, in_hi]` to `[out_lo, out_hi]`, clamped
/// to the output range. Works regardless of whether `in_lo < in_hi` or vice
/// versa.
fn remap(value: f64, in_lo: f64, in_hi: f64, out_lo: f64, out_hi: f64) -> f64 {
    let t = if (in_hi - in_lo).abs() < f64::EPSILON {
        0.5
    } else {
        (value - in_lo) / (in_hi - in_lo)
    };
    let clamped = t.clamp(0.0, 1.0);
    out_lo + clamped * (out_hi - out_lo)
}
