// =============================================================================
// Kill Switch — portfolio-wide catastrophic-condition detector
// =============================================================================
//
// Five triggers, any of which flattens every position and opens a cooldown
// during which the entry gate rejects everything:
//
//   1. Simultaneous Collapse — >= N pools drop health within a 120s window.
//   2. Oscillation Death     — multiple pools whipsawing: active bin
//                              direction alternating with size over the
//                              last few cycles.
//   3. Coordinated Whale     — large active-bin jumps across >= 2 pools in
//                              the same cycle.
//   4. Liquidity Exodus      — >= 50% of pools losing >= 30% of liquidity.
//   5. Telemetry Unreliable  — too many pools with missing snapshots.
//
// The switch records why it fired; callers force-exit all positions. A
// force-exit overrides any harmonic freeze.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::runtime_config::KillSwitchParams;

/// Bin-jump history retained per pool for oscillation detection.
const JUMP_HISTORY: usize = 6;
/// Alternating jumps required to call a pool oscillating.
const OSCILLATION_RUN: usize = 4;
/// Minimum |jump| for an oscillation leg to count.
const OSCILLATION_MIN_JUMP: i32 = 2;
/// Minimum tracked pools before fraction-based triggers are meaningful.
const MIN_POOLS_FOR_FRACTIONS: usize = 4;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One pool's contribution to this cycle's portfolio-wide picture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolCycleObservation {
    pub pool: String,
    /// The pool's health score collapsed this cycle (harmonic or gate view).
    pub health_collapsed: bool,
    /// Signed active-bin move since the previous snapshot.
    pub active_bin_jump: i32,
    /// Signed liquidity change as a fraction of previous TVL.
    pub liquidity_change_pct: f64,
    /// No fresh snapshot arrived for this pool this cycle.
    pub snapshot_missing: bool,
}

/// Why the switch fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KillReason {
    SimultaneousCollapse { pools: u32 },
    OscillationDeath { pools: u32 },
    CoordinatedWhale { pools: u32 },
    LiquidityExodus { fraction: f64 },
    TelemetryUnreliable { fraction: f64 },
}

impl std::fmt::Display for KillReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SimultaneousCollapse { pools } => {
                write!(f, "SIMULTANEOUS_COLLAPSE ({pools} pools)")
            }
            Self::OscillationDeath { pools } => write!(f, "OSCILLATION_DEATH ({pools} pools)"),
            Self::CoordinatedWhale { pools } => write!(f, "COORDINATED_WHALE ({pools} pools)"),
            Self::LiquidityExodus { fraction } => {
                write!(f, "LIQUIDITY_EXODUS ({:.0}% of pools)", fraction * 100.0)
            }
            Self::TelemetryUnreliable { fraction } => {
                write!(f, "TELEMETRY_UNRELIABLE ({:.0}% missing)", fraction * 100.0)
            }
        }
    }
}

struct Inner {
    /// (timestamp, pool) of recent health collapses.
    collapse_events: VecDeque<(i64, String)>,
    /// Recent signed bin jumps per pool.
    jump_history: HashMap<String, VecDeque<i32>>,
    triggered_at_ms: Option<i64>,
    last_reason: Option<KillReason>,
    kill_count: u32,
}

// ---------------------------------------------------------------------------
// KillSwitch
// ---------------------------------------------------------------------------

/// Thread-safe portfolio-wide catastrophe detector.
pub struct KillSwitch {
    params: KillSwitchParams,
    state: RwLock<Inner>,
}

impl KillSwitch {
    pub fn new(params: KillSwitchParams) -> Self {
        Self {
            params,
            state: RwLock::new(Inner {
                collapse_events: VecDeque::new(),
                jump_history: HashMap::new(),
                triggered_at_ms: None,
                last_reason: None,
                kill_count: 0,
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Evaluation
    // -------------------------------------------------------------------------

    /// Ingest one cycle's observations and evaluate every trigger.
    /// Returns `Some(reason)` exactly when the switch fires this cycle.
    pub fn evaluate(
        &self,
        observations: &[PoolCycleObservation],
        now_ms: i64,
    ) -> Option<KillReason> {
        let mut s = self.state.write();

        // ── Ingest: collapse window and jump history ─────────────────────
        let window_start = now_ms - self.params.collapse_window_ms as i64;
        while s
            .collapse_events
            .front()
            .is_some_and(|(t, _)| *t < window_start)
        {
            s.collapse_events.pop_front();
        }
        for obs in observations {
            if obs.health_collapsed
                && !s.collapse_events.iter().any(|(_, p)| p == &obs.pool)
            {
                s.collapse_events.push_back((now_ms, obs.pool.clone()));
            }
            if !obs.snapshot_missing {
                let ring = s.jump_history.entry(obs.pool.clone()).or_default();
                ring.push_back(obs.active_bin_jump);
                while ring.len() > JUMP_HISTORY {
                    ring.pop_front();
                }
            }
        }

        // While cooling down the switch stays quiet; callers consult
        // `in_cooldown` separately.
        if let Some(triggered) = s.triggered_at_ms {
            if now_ms - triggered < self.params.cooldown_ms as i64 {
                return None;
            }
        }

        // ── 1. Simultaneous collapse ─────────────────────────────────────
        let collapsed = s.collapse_events.len() as u32;
        if collapsed >= self.params.collapse_min_pools {
            return Some(self.trip(
                &mut s,
                KillReason::SimultaneousCollapse { pools: collapsed },
                now_ms,
            ));
        }

        // ── 2. Oscillation death ─────────────────────────────────────────
        let oscillating = s
            .jump_history
            .values()
            .filter(|ring| is_oscillating(ring))
            .count() as u32;
        if oscillating >= self.params.collapse_min_pools {
            return Some(self.trip(
                &mut s,
                KillReason::OscillationDeath { pools: oscillating },
                now_ms,
            ));
        }

        // ── 3. Coordinated whale ─────────────────────────────────────────
        let whale_pools = observations
            .iter()
            .filter(|o| o.active_bin_jump.abs() >= self.params.whale_bin_jump)
            .count() as u32;
        if whale_pools >= self.params.whale_min_pools {
            return Some(self.trip(
                &mut s,
                KillReason::CoordinatedWhale { pools: whale_pools },
                now_ms,
            ));
        }

        // Fraction-based triggers need a meaningful universe.
        if observations.len() >= MIN_POOLS_FOR_FRACTIONS {
            // ── 4. Liquidity exodus ──────────────────────────────────────
            let draining = observations
                .iter()
                .filter(|o| o.liquidity_change_pct <= -self.params.exodus_liquidity_drop_pct)
                .count();
            let fraction = draining as f64 / observations.len() as f64;
            if fraction >= self.params.exodus_pool_fraction {
                return Some(self.trip(&mut s, KillReason::LiquidityExodus { fraction }, now_ms));
            }

            // ── 5. Telemetry unreliable ──────────────────────────────────
            let missing = observations.iter().filter(|o| o.snapshot_missing).count();
            let fraction = missing as f64 / observations.len() as f64;
            if fraction >= self.params.missing_snapshot_fraction {
                return Some(self.trip(
                    &mut s,
                    KillReason::TelemetryUnreliable { fraction },
                    now_ms,
                ));
            }
        }

        debug!(
            pools = observations.len(),
            collapsed,
            oscillating,
            "kill switch: all clear"
        );
        None
    }

    fn trip(&self, s: &mut Inner, reason: KillReason, now_ms: i64) -> KillReason {
        error!(reason = %reason, "KILL SWITCH TRIGGERED — force-exiting all positions");
        s.triggered_at_ms = Some(now_ms);
        s.last_reason = Some(reason.clone());
        s.kill_count += 1;
        s.collapse_events.clear();
        reason
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// True while the post-kill cooldown is in force; the entry gate must
    /// reject everything.
    pub fn in_cooldown(&self, now_ms: i64) -> bool {
        let s = self.state.read();
        s.triggered_at_ms
            .is_some_and(|t| now_ms - t < self.params.cooldown_ms as i64)
    }

    /// The most recent trigger reason, if any.
    pub fn last_reason(&self) -> Option<KillReason> {
        self.state.read().last_reason.clone()
    }

    /// Total number of kills this process lifetime.
    pub fn kill_count(&self) -> u32 {
        self.state.read().kill_count
    }
}

/// A pool oscillates when its last `OSCILLATION_RUN` jumps alternate in
/// sign with meaningful size.
fn is_oscillating(jumps: &VecDeque<i32>) -> bool {
    if jumps.len() < OSCILLATION_RUN {
        return false;
    }
    let recent: Vec<i32> = jumps.iter().rev().take(OSCILLATION_RUN).copied().collect();
    recent
        .windows(2)
        .all(|w| w[0] * w[1] < 0 && w[0].abs() >= OSCILLATION_MIN_JUMP && w[1].abs() >= OSCILLATION_MIN_JUMP)
}

impl std::fmt::Debug for KillSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state.read();
        f.debug_struct("KillSwitch")
            .field("triggered", &s.triggered_at_ms.is_some())
            .field("kill_count", &s.kill_count)
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(pool: &str) -> PoolCycleObservation {
        PoolCycleObservation {
            pool: pool.to_string(),
            health_collapsed: false,
            active_bin_jump: 0,
            liquidity_change_pct: 0.0,
            snapshot_missing: false,
        }
    }

    fn collapsed(pool: &str) -> PoolCycleObservation {
        PoolCycleObservation {
            health_collapsed: true,
            ..quiet(pool)
        }
    }

    fn switch() -> KillSwitch {
        KillSwitch::new(KillSwitchParams::default())
    }

    #[test]
    fn test_quiet_market_stays_clear() {
        let ks = switch();
        let obs: Vec<_> = (0..6).map(|i| quiet(&format!("p{i}"))).collect();
        assert!(ks.evaluate(&obs, 1_000).is_none());
        assert!(!ks.in_cooldown(1_000));
    }

    #[test]
    fn test_simultaneous_collapse_trips_at_three_pools() {
        let ks = switch();

        // Two collapses: not enough.
        let obs = vec![collapsed("a"), collapsed("b"), quiet("c"), quiet("d")];
        assert!(ks.evaluate(&obs, 1_000).is_none());

        // Third collapse inside the 120s window trips.
        let obs = vec![quiet("a"), quiet("b"), collapsed("c"), quiet("d")];
        let reason = ks.evaluate(&obs, 60_000).unwrap();
        assert!(matches!(reason, KillReason::SimultaneousCollapse { pools: 3 }));
        assert!(ks.in_cooldown(60_000));
    }

    #[test]
    fn test_collapse_window_expires() {
        let ks = switch();
        let obs = vec![collapsed("a"), collapsed("b"), quiet("c"), quiet("d")];
        assert!(ks.evaluate(&obs, 1_000).is_none());

        // Third collapse arrives 3 minutes later: the first two aged out.
        let obs = vec![quiet("a"), quiet("b"), collapsed("c"), quiet("d")];
        assert!(ks.evaluate(&obs, 181_000).is_none());
    }

    #[test]
    fn test_coordinated_whale_trips() {
        let ks = switch();
        let mut a = quiet("a");
        a.active_bin_jump = 15;
        let mut b = quiet("b");
        b.active_bin_jump = -13;
        let obs = vec![a, b, quiet("c"), quiet("d")];

        let reason = ks.evaluate(&obs, 1_000).unwrap();
        assert!(matches!(reason, KillReason::CoordinatedWhale { pools: 2 }));
    }

    #[test]
    fn test_single_whale_not_coordinated() {
        let ks = switch();
        let mut a = quiet("a");
        a.active_bin_jump = 20;
        let obs = vec![a, quiet("b"), quiet("c"), quiet("d")];
        assert!(ks.evaluate(&obs, 1_000).is_none());
    }

    #[test]
    fn test_liquidity_exodus_trips_at_half_the_universe() {
        let ks = switch();
        let mut obs: Vec<_> = (0..4).map(|i| quiet(&format!("p{i}"))).collect();
        obs[0].liquidity_change_pct = -0.40;
        obs[1].liquidity_change_pct = -0.35;

        let reason = ks.evaluate(&obs, 1_000).unwrap();
        match reason {
            KillReason::LiquidityExodus { fraction } => {
                assert!((fraction - 0.5).abs() < 1e-10)
            }
            other => panic!("unexpected reason {other:?}"),
        }
    }

    #[test]
    fn test_mild_outflow_does_not_count_as_exodus() {
        let ks = switch();
        let mut obs: Vec<_> = (0..4).map(|i| quiet(&format!("p{i}"))).collect();
        for o in obs.iter_mut() {
            o.liquidity_change_pct = -0.10;
        }
        assert!(ks.evaluate(&obs, 1_000).is_none());
    }

    #[test]
    fn test_telemetry_unreliable_trips() {
        let ks = switch();
        let mut obs: Vec<_> = (0..4).map(|i| quiet(&format!("p{i}"))).collect();
        obs[0].snapshot_missing = true;
        obs[1].snapshot_missing = true;

        let reason = ks.evaluate(&obs, 1_000).unwrap();
        assert!(matches!(reason, KillReason::TelemetryUnreliable { .. }));
    }

    #[test]
    fn test_small_universe_skips_fraction_triggers() {
        // With only two pools a 50% missing fraction is one flaky feed, not
        // a systemic failure.
        let ks = switch();
        let mut obs = vec![quiet("a"), quiet("b")];
        obs[0].snapshot_missing = true;
        assert!(ks.evaluate(&obs, 1_000).is_none());
    }

    #[test]
    fn test_oscillation_death() {
        let ks = switch();
        // Three pools whipsawing +3/-3 for five cycles.
        for cycle in 0..5 {
            let jump = if cycle % 2 == 0 { 3 } else { -3 };
            let obs: Vec<_> = (0..3)
                .map(|i| {
                    let mut o = quiet(&format!("p{i}"));
                    o.active_bin_jump = jump;
                    o
                })
                .collect();
            let result = ks.evaluate(&obs, 1_000 + cycle * 10_000);
            if cycle < 3 {
                assert!(result.is_none(), "tripped too early at cycle {cycle}");
            } else if let Some(reason) = result {
                assert!(matches!(reason, KillReason::OscillationDeath { pools: 3 }));
                return;
            }
        }
        panic!("oscillation death never tripped");
    }

    #[test]
    fn test_cooldown_gates_and_expires() {
        let ks = switch();
        let obs = vec![collapsed("a"), collapsed("b"), collapsed("c"), quiet("d")];
        ks.evaluate(&obs, 1_000).unwrap();

        assert!(ks.in_cooldown(1_000));
        assert!(ks.in_cooldown(100_000));
        // Default cooldown is 2 minutes.
        assert!(!ks.in_cooldown(122_000));

        // While cooling down, evaluation stays quiet even on fresh triggers.
        let obs = vec![collapsed("x"), collapsed("y"), collapsed("z"), quiet("d")];
        assert!(ks.evaluate(&obs, 60_000).is_none());
        assert_eq!(ks.kill_count(), 1);
    }

    #[test]
    fn test_is_oscillating_helper() {
        let osc: VecDeque<i32> = [3, -3, 4, -2].into_iter().collect();
        assert!(is_oscillating(&osc));

        let trending: VecDeque<i32> = [3, 3, 4, 2].into_iter().collect();
        assert!(!is_oscillating(&trending));

        let tiny: VecDeque<i32> = [1, -1, 1, -1].into_iter().collect();
        assert!(!is_oscillating(&tiny), "sub-threshold jumps don't count");

        let short: VecDeque<i32> = [3, -3].into_iter().collect();
        assert!(!is_oscillating(&short));
    }
}
