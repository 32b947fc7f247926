// =============================================================================
// Regime Playbook — per-regime risk and behaviour parameters
// =============================================================================
//
// Maps the committed macro regime to the knobs the rest of the engine
// consumes: size multiplier, exit threshold, hold-window scaling, whether
// extended profit targets and stacking are allowed, entry cooldowns, and
// the force-exit flag.
//
// CHAOS mandates force-exit-all: the playbook is the single place that
// decision is encoded.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::regime::classifier::MacroRegime;

/// Behaviour parameters for one regime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegimeParams {
    /// Multiplier applied to every position size computed this cycle.
    pub size_multiplier: f64,
    /// Score below which open positions are exited.
    pub exit_threshold: f64,
    /// Scales the expected hold window for new positions.
    pub hold_window_multiplier: f64,
    /// Whether TP2-style extended targets may arm.
    pub allow_extended_targets: bool,
    /// Whether adding to an existing pool position is allowed.
    pub allow_stacking: bool,
    /// Minimum execution quality required before stacking is honoured.
    pub stacking_exec_quality_min: f64,
    /// Cooldown between entries.
    pub entry_cooldown_ms: u64,
    /// Hard cap on concurrent positions in this regime.
    pub max_concurrent_positions: u32,
    /// When true the entry gate rejects everything.
    pub block_entries: bool,
    /// When true every open position is force-exited this cycle.
    pub force_exit_all: bool,
    /// Extra cooldown after leaving CHAOS before entries resume.
    pub post_chaos_cooldown_ms: u64,
}

impl MacroRegime {
    /// The playbook row for this regime.
    pub fn params(self) -> RegimeParams {
        match self {
            // Trend: let winners run — bigger size, longer holds, stacking
            // allowed when fills are clean.
            Self::Trend => RegimeParams {
                size_multiplier: 1.2,
                exit_threshold: 18.0,
                hold_window_multiplier: 1.5,
                allow_extended_targets: true,
                allow_stacking: true,
                stacking_exec_quality_min: 0.70,
                entry_cooldown_ms: 60_000,
                max_concurrent_positions: 8,
                block_entries: false,
                force_exit_all: false,
                post_chaos_cooldown_ms: 0,
            },
            // High velocity: fees are rich but drift risk is elevated —
            // normal size, short holds, no stacking.
            Self::HighVelocity => RegimeParams {
                size_multiplier: 1.0,
                exit_threshold: 22.0,
                hold_window_multiplier: 0.75,
                allow_extended_targets: true,
                allow_stacking: false,
                stacking_exec_quality_min: 1.0,
                entry_cooldown_ms: 30_000,
                max_concurrent_positions: 6,
                block_entries: false,
                force_exit_all: false,
                post_chaos_cooldown_ms: 0,
            },
            Self::Neutral => RegimeParams {
                size_multiplier: 1.0,
                exit_threshold: 22.0,
                hold_window_multiplier: 1.0,
                allow_extended_targets: false,
                allow_stacking: false,
                stacking_exec_quality_min: 1.0,
                entry_cooldown_ms: 120_000,
                max_concurrent_positions: 6,
                block_entries: false,
                force_exit_all: false,
                post_chaos_cooldown_ms: 0,
            },
            // Chop: churn eats fees — small size, short holds, long cooldown.
            Self::Chop => RegimeParams {
                size_multiplier: 0.6,
                exit_threshold: 26.0,
                hold_window_multiplier: 0.6,
                allow_extended_targets: false,
                allow_stacking: false,
                stacking_exec_quality_min: 1.0,
                entry_cooldown_ms: 300_000,
                max_concurrent_positions: 3,
                block_entries: false,
                force_exit_all: false,
                post_chaos_cooldown_ms: 0,
            },
            // Chaos: no edge — flatten and stand down.
            Self::Chaos => RegimeParams {
                size_multiplier: 0.0,
                exit_threshold: 100.0,
                hold_window_multiplier: 0.0,
                allow_extended_targets: false,
                allow_stacking: false,
                stacking_exec_quality_min: 1.0,
                entry_cooldown_ms: 600_000,
                max_concurrent_positions: 0,
                block_entries: true,
                force_exit_all: true,
                post_chaos_cooldown_ms: 300_000,
            },
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chaos_mandates_force_exit() {
        let p = MacroRegime::Chaos.params();
        assert!(p.force_exit_all);
        assert!(p.block_entries);
        assert_eq!(p.max_concurrent_positions, 0);
        assert!((p.size_multiplier - 0.0).abs() < f64::EPSILON);
        assert!(p.post_chaos_cooldown_ms > 0);
    }

    #[test]
    fn test_only_chaos_forces_exit() {
        for regime in [
            MacroRegime::Trend,
            MacroRegime::Chop,
            MacroRegime::Neutral,
            MacroRegime::HighVelocity,
        ] {
            assert!(!regime.params().force_exit_all, "{regime} must not force-exit");
            assert!(!regime.params().block_entries);
        }
    }

    #[test]
    fn test_trend_is_most_permissive() {
        let trend = MacroRegime::Trend.params();
        let chop = MacroRegime::Chop.params();
        assert!(trend.size_multiplier > chop.size_multiplier);
        assert!(trend.hold_window_multiplier > chop.hold_window_multiplier);
        assert!(trend.allow_stacking);
        assert!(!chop.allow_stacking);
        assert!(trend.max_concurrent_positions > chop.max_concurrent_positions);
    }

    #[test]
    fn test_stacking_requires_execution_quality() {
        let trend = MacroRegime::Trend.params();
        assert!(trend.allow_stacking);
        assert!((trend.stacking_exec_quality_min - 0.70).abs() < f64::EPSILON);
    }

    #[test]
    fn test_high_velocity_shortens_holds() {
        let hv = MacroRegime::HighVelocity.params();
        assert!(hv.hold_window_multiplier < 1.0);
        assert!(hv.allow_extended_targets);
    }
}
