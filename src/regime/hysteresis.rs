// =============================================================================
// Regime Governor — hysteresis over noisy regime proposals
// =============================================================================
//
// A raw classification can flicker across a rule boundary every cycle. The
// governor only commits a switch when all three hold:
//
//   1. Dwell   — the current regime has been in force for at least
//                `min_dwell_ms`.
//   2. Confirm — the proposed regime appeared in M of the last N proposals.
//   3. Band    — the classifier itself widens boundaries for non-current
//                regimes (see classifier.rs), so the proposal already
//                cleared the boundary with margin.
//
// Every committed switch is recorded as an ordered transition event.
// =============================================================================

use std::collections::VecDeque;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::regime::classifier::{classify, MacroRegime, MacroSignals};
use crate::runtime_config::HysteresisParams;

/// Maximum transition events retained in memory.
const MAX_TRANSITIONS: usize = 200;

/// One committed regime switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeTransition {
    pub from: MacroRegime,
    pub to: MacroRegime,
    pub at_ms: i64,
    pub confidence: f64,
}

struct Inner {
    current: MacroRegime,
    last_change_ms: i64,
    proposals: VecDeque<MacroRegime>,
    transitions: Vec<RegimeTransition>,
}

/// Thread-safe regime governor. Feed it signals once per cycle via
/// [`RegimeGovernor::observe`]; read the committed regime with
/// [`RegimeGovernor::current`].
pub struct RegimeGovernor {
    state: RwLock<Inner>,
    params: HysteresisParams,
}

impl RegimeGovernor {
    /// Start in NEUTRAL at `now_ms`.
    pub fn new(params: HysteresisParams, now_ms: i64) -> Self {
        Self {
            state: RwLock::new(Inner {
                current: MacroRegime::Neutral,
                last_change_ms: now_ms,
                proposals: VecDeque::new(),
                transitions: Vec::new(),
            }),
            params,
        }
    }

    /// Classify this cycle's signals and apply hysteresis. Returns the
    /// regime in force after the observation.
    pub fn observe(&self, signals: &MacroSignals, now_ms: i64) -> MacroRegime {
        let mut s = self.state.write();

        let (proposal, confidence) = classify(signals, s.current, &self.params);

        s.proposals.push_back(proposal);
        while s.proposals.len() > self.params.confirm_window {
            s.proposals.pop_front();
        }

        if proposal == s.current {
            return s.current;
        }

        // Dwell: no switch until the current regime has aged enough.
        let dwell_ms = now_ms - s.last_change_ms;
        if dwell_ms < self.params.min_dwell_ms as i64 {
            debug!(
                current = %s.current,
                proposal = %proposal,
                dwell_ms,
                min_dwell_ms = self.params.min_dwell_ms,
                "regime switch suppressed: dwell time not met"
            );
            return s.current;
        }

        // Confirmations: the proposal must recur in M of the last N cycles.
        let confirmations = s.proposals.iter().filter(|&&p| p == proposal).count() as u32;
        if confirmations < self.params.confirm_required {
            debug!(
                current = %s.current,
                proposal = %proposal,
                confirmations,
                required = self.params.confirm_required,
                "regime switch suppressed: confirmations not met"
            );
            return s.current;
        }

        // Commit.
        let transition = RegimeTransition {
            from: s.current,
            to: proposal,
            at_ms: now_ms,
            confidence,
        };
        info!(
            from = %transition.from,
            to = %transition.to,
            confidence = format!("{:.2}", confidence),
            "regime transition committed"
        );

        s.current = proposal;
        s.last_change_ms = now_ms;
        s.proposals.clear();
        s.transitions.push(transition);
        if s.transitions.len() > MAX_TRANSITIONS {
            s.transitions.remove(0);
        }

        s.current
    }

    /// The regime currently in force.
    pub fn current(&self) -> MacroRegime {
        self.state.read().current
    }

    /// Milliseconds the current regime has been in force.
    pub fn time_in_regime(&self, now_ms: i64) -> i64 {
        now_ms - self.state.read().last_change_ms
    }

    /// Ordered history of committed transitions (oldest first).
    pub fn transitions(&self) -> Vec<RegimeTransition> {
        self.state.read().transitions.clone()
    }
}

impl std::fmt::Debug for RegimeGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state.read();
        f.debug_struct("RegimeGovernor")
            .field("current", &s.current)
            .field("transitions", &s.transitions.len())
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn chaos_signals() -> MacroSignals {
        MacroSignals {
            entropy_level: 0.99,
            ..MacroSignals::default()
        }
    }

    fn neutral_signals() -> MacroSignals {
        MacroSignals {
            entropy_level: 0.50,
            velocity: 30.0,
            consistency: 0.45,
            execution_quality: 0.8,
            ..MacroSignals::default()
        }
    }

    #[test]
    fn test_starts_neutral() {
        let gov = RegimeGovernor::new(HysteresisParams::default(), 0);
        assert_eq!(gov.current(), MacroRegime::Neutral);
    }

    #[test]
    fn test_single_spike_does_not_flip() {
        // NEUTRAL for 2 minutes; one CHAOS proposal must not flip the regime
        // (dwell not met, confirmations not met).
        let gov = RegimeGovernor::new(HysteresisParams::default(), 0);
        let regime = gov.observe(&chaos_signals(), 120_000);
        assert_eq!(regime, MacroRegime::Neutral);
        assert!(gov.transitions().is_empty());
    }

    #[test]
    fn test_sustained_chaos_commits_after_dwell_and_confirmations() {
        let gov = RegimeGovernor::new(HysteresisParams::default(), 0);

        // Three consecutive CHAOS proposals, each a 2-minute cycle apart.
        // The third observation is at t=6min: dwell (3 min) satisfied and
        // 3-of-5 confirmations reached.
        assert_eq!(gov.observe(&chaos_signals(), 120_000), MacroRegime::Neutral);
        assert_eq!(gov.observe(&chaos_signals(), 240_000), MacroRegime::Neutral);
        assert_eq!(gov.observe(&chaos_signals(), 360_000), MacroRegime::Chaos);

        let transitions = gov.transitions();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from, MacroRegime::Neutral);
        assert_eq!(transitions[0].to, MacroRegime::Chaos);
        assert_eq!(transitions[0].at_ms, 360_000);
    }

    #[test]
    fn test_dwell_blocks_even_with_confirmations() {
        let mut params = HysteresisParams::default();
        params.min_dwell_ms = 600_000; // 10 minutes

        let gov = RegimeGovernor::new(params, 0);
        for i in 1..=5 {
            let regime = gov.observe(&chaos_signals(), i * 60_000);
            assert_eq!(regime, MacroRegime::Neutral, "cycle {} flipped early", i);
        }
        // Past the dwell the accumulated confirmations let it through.
        assert_eq!(gov.observe(&chaos_signals(), 660_000), MacroRegime::Chaos);
    }

    #[test]
    fn test_transition_spacing_respects_dwell() {
        let gov = RegimeGovernor::new(HysteresisParams::default(), 0);

        // Drive into CHAOS.
        gov.observe(&chaos_signals(), 120_000);
        gov.observe(&chaos_signals(), 240_000);
        gov.observe(&chaos_signals(), 360_000);
        assert_eq!(gov.current(), MacroRegime::Chaos);

        // Immediately propose NEUTRAL: suppressed by dwell, then confirmed.
        gov.observe(&neutral_signals(), 380_000);
        assert_eq!(gov.current(), MacroRegime::Chaos);
        gov.observe(&neutral_signals(), 540_000);
        gov.observe(&neutral_signals(), 560_000);
        gov.observe(&neutral_signals(), 580_000);

        let transitions = gov.transitions();
        for pair in transitions.windows(2) {
            assert!(
                pair[1].at_ms - pair[0].at_ms >= HysteresisParams::default().min_dwell_ms as i64,
                "transitions spaced closer than min dwell"
            );
        }
    }

    #[test]
    fn test_alternating_proposals_still_respect_dwell() {
        // Alternating proposals can eventually accumulate 3-of-5 for either
        // side; whatever switches happen must honour the dwell spacing.
        let gov = RegimeGovernor::new(HysteresisParams::default(), 0);
        for i in 1..=20 {
            let s = if i % 2 == 0 {
                chaos_signals()
            } else {
                neutral_signals()
            };
            gov.observe(&s, i * 120_000);
        }
        let transitions = gov.transitions();
        for pair in transitions.windows(2) {
            assert!(
                pair[1].at_ms - pair[0].at_ms
                    >= HysteresisParams::default().min_dwell_ms as i64,
                "transitions spaced closer than min dwell"
            );
        }
    }

    #[test]
    fn test_time_in_regime() {
        let gov = RegimeGovernor::new(HysteresisParams::default(), 1_000);
        assert_eq!(gov.time_in_regime(61_000), 60_000);
    }
}
