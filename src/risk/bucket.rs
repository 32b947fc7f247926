// =============================================================================
// Risk Bucket Engine — score bands, leverage, and position sizing
// =============================================================================
//
// Classifies a composite score into a risk tier, interpolates leverage and
// size caps within the tier's band, and enforces portfolio-level capacity:
//
//   Tier A  score >= 40      leverage 1.4-1.8   size cap  8-12%   4 slots
//   Tier B  score 32-40      leverage 1.2-1.5   size cap  5-8%    4 slots
//   Tier C  score 24-32      leverage 1.0-1.2   size cap  3-5%    3 slots
//   Tier D  score < 24       forbidden
//
// Sizing pipeline per candidate:
//   base = sizeCap% x totalCapital
//   leveraged = base x leverage
//   final = leveraged x migrationPenalty, capped by remaining portfolio
//           capacity and by the pool-ownership limit (a fraction of the
//           pool's own TVL, so the engine never dominates a thin book).
//
// Batch assignment walks score-descending candidates against a mutable
// portfolio copy so per-cycle capacity accounting stays consistent.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::runtime_config::PortfolioParams;

/// Positions below this many dollars are not worth venue fees.
const MIN_VIABLE_SIZE_USD: f64 = 10.0;

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// Risk tier derived from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskTier {
    A,
    B,
    C,
    D,
}

impl RiskTier {
    /// Tier for a composite score. Boundaries are inclusive on the lower
    /// bound: exactly 40.0 is tier A, just below is B.
    pub fn for_score(score: f64) -> Self {
        if score >= 40.0 {
            Self::A
        } else if score >= 32.0 {
            Self::B
        } else if score >= 24.0 {
            Self::C
        } else {
            Self::D
        }
    }

    /// Score band used for within-tier interpolation `(lo, hi)`.
    fn band(self) -> (f64, f64) {
        match self {
            Self::A => (40.0, 60.0),
            Self::B => (32.0, 40.0),
            Self::C => (24.0, 32.0),
            Self::D => (0.0, 24.0),
        }
    }

    /// Allowed leverage range `(lo, hi)`.
    fn leverage_range(self) -> (f64, f64) {
        match self {
            Self::A => (1.4, 1.8),
            Self::B => (1.2, 1.5),
            Self::C => (1.0, 1.2),
            Self::D => (0.0, 0.0),
        }
    }

    /// Size cap range as a percentage of total capital `(lo, hi)`.
    fn size_cap_range_pct(self) -> (f64, f64) {
        match self {
            Self::A => (8.0, 12.0),
            Self::B => (5.0, 8.0),
            Self::C => (3.0, 5.0),
            Self::D => (0.0, 0.0),
        }
    }

    /// Maximum concurrent positions in this tier.
    fn max_positions(self) -> u32 {
        match self {
            Self::A => 4,
            Self::B => 4,
            Self::C => 3,
            Self::D => 0,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::C => 2,
            Self::D => 3,
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
            Self::D => write!(f, "D"),
        }
    }
}

// ---------------------------------------------------------------------------
// Assignment types
// ---------------------------------------------------------------------------

/// A sizing decision for one admitted candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssignment {
    pub pool: String,
    pub tier: RiskTier,
    pub score: f64,
    pub leverage: f64,
    pub size_cap_pct: f64,
    pub base_size_usd: f64,
    pub leveraged_size_usd: f64,
    pub migration_penalty_applied: bool,
    pub final_size_usd: f64,
}

/// Why a candidate was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    TierForbidden,
    TierAtCapacity,
    MaxPositions,
    MaxDeployment,
    BelowMinimumCapital,
    NoCapacity,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TierForbidden => write!(f, "TIER_FORBIDDEN"),
            Self::TierAtCapacity => write!(f, "TIER_AT_CAPACITY"),
            Self::MaxPositions => write!(f, "MAX_POSITIONS"),
            Self::MaxDeployment => write!(f, "MAX_DEPLOYMENT"),
            Self::BelowMinimumCapital => write!(f, "BELOW_MINIMUM_CAPITAL"),
            Self::NoCapacity => write!(f, "NO_CAPACITY"),
        }
    }
}

/// Mutable view of portfolio state consumed during batch assignment. Seeded
/// from the ledger snapshot at cycle start; simulated commits mutate the
/// copy, never the ledger itself.
#[derive(Debug, Clone, Default)]
pub struct PortfolioView {
    pub total_capital_usd: f64,
    pub deployed_usd: f64,
    pub total_positions: u32,
    /// Open position count per tier, indexed A, B, C, D.
    pub tier_positions: [u32; 4],
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// One candidate for batch assignment.
#[derive(Debug, Clone)]
pub struct SizingCandidate {
    pub pool: String,
    pub score: f64,
    /// Liquidity slope in fraction of TVL per minute (migration penalty
    /// input).
    pub liquidity_slope_per_min: f64,
    /// The pool's own TVL (ownership cap input).
    pub pool_tvl_usd: f64,
}

/// Stateless sizing engine; all portfolio state arrives via
/// [`PortfolioView`].
pub struct RiskBucketEngine {
    params: PortfolioParams,
}

impl RiskBucketEngine {
    pub fn new(params: PortfolioParams) -> Self {
        Self { params }
    }

    /// Assign a tier and size to one candidate, committing the result into
    /// `view` on success.
    pub fn assign(
        &self,
        candidate: &SizingCandidate,
        view: &mut PortfolioView,
    ) -> Result<RiskAssignment, RejectReason> {
        if view.total_capital_usd < self.params.min_operating_capital_usd {
            return Err(RejectReason::BelowMinimumCapital);
        }

        let tier = RiskTier::for_score(candidate.score);
        if tier == RiskTier::D {
            return Err(RejectReason::TierForbidden);
        }

        let tier_cap = tier.max_positions().min(self.params.max_positions_per_tier);
        if view.tier_positions[tier.index()] >= tier_cap {
            return Err(RejectReason::TierAtCapacity);
        }

        if view.total_positions >= self.params.max_positions {
            return Err(RejectReason::MaxPositions);
        }

        let max_deployment_usd =
            view.total_capital_usd * self.params.max_deployment_pct / 100.0;
        if view.deployed_usd >= max_deployment_usd {
            return Err(RejectReason::MaxDeployment);
        }

        // Within-tier interpolation by the score's position in the band.
        let (band_lo, band_hi) = tier.band();
        let t = ((candidate.score - band_lo) / (band_hi - band_lo)).clamp(0.0, 1.0);

        let (lev_lo, lev_hi) = tier.leverage_range();
        let leverage = lev_lo + t * (lev_hi - lev_lo);

        let (cap_lo, cap_hi) = tier.size_cap_range_pct();
        let size_cap_pct = cap_lo + t * (cap_hi - cap_lo);
        let base_size_usd = size_cap_pct / 100.0 * view.total_capital_usd;

        let leveraged_size_usd = base_size_usd * leverage;

        let migration_penalty_applied =
            candidate.liquidity_slope_per_min < self.params.migration_penalty_slope_per_min;
        let penalised = if migration_penalty_applied {
            leveraged_size_usd * self.params.migration_penalty_factor
        } else {
            leveraged_size_usd
        };

        // Never dominate the pool, never exceed remaining portfolio room.
        let ownership_cap_usd =
            candidate.pool_tvl_usd * self.params.max_pool_ownership_pct / 100.0;
        let remaining_capacity_usd = max_deployment_usd - view.deployed_usd;
        let final_size_usd = penalised.min(ownership_cap_usd).min(remaining_capacity_usd);

        if final_size_usd < MIN_VIABLE_SIZE_USD {
            return Err(RejectReason::NoCapacity);
        }

        // Commit against the working copy.
        view.deployed_usd += final_size_usd;
        view.total_positions += 1;
        view.tier_positions[tier.index()] += 1;

        debug!(
            pool = %candidate.pool,
            tier = %tier,
            score = format!("{:.1}", candidate.score),
            leverage = format!("{:.2}", leverage),
            size_cap_pct = format!("{:.1}", size_cap_pct),
            final_size = format!("{:.0}", final_size_usd),
            penalty = migration_penalty_applied,
            "risk assignment"
        );

        Ok(RiskAssignment {
            pool: candidate.pool.clone(),
            tier,
            score: candidate.score,
            leverage,
            size_cap_pct,
            base_size_usd,
            leveraged_size_usd,
            migration_penalty_applied,
            final_size_usd,
        })
    }

    /// Assign a whole cycle's candidates. Callers pass candidates sorted
    /// score-descending so capacity is consumed by the best pools first.
    pub fn batch_assign(
        &self,
        candidates: &[SizingCandidate],
        view: &PortfolioView,
    ) -> Vec<(String, Result<RiskAssignment, RejectReason>)> {
        let mut working = view.clone();
        candidates
            .iter()
            .map(|c| (c.pool.clone(), self.assign(c, &mut working)))
            .collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> RiskBucketEngine {
        RiskBucketEngine::new(PortfolioParams::default())
    }

    fn view(total: f64) -> PortfolioView {
        PortfolioView {
            total_capital_usd: total,
            deployed_usd: 0.0,
            total_positions: 0,
            tier_positions: [0; 4],
        }
    }

    fn candidate(pool: &str, score: f64) -> SizingCandidate {
        SizingCandidate {
            pool: pool.to_string(),
            score,
            liquidity_slope_per_min: 0.0,
            pool_tvl_usd: 10_000_000.0,
        }
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(RiskTier::for_score(40.0), RiskTier::A);
        assert_eq!(RiskTier::for_score(39.999), RiskTier::B);
        assert_eq!(RiskTier::for_score(32.0), RiskTier::B);
        assert_eq!(RiskTier::for_score(31.999), RiskTier::C);
        assert_eq!(RiskTier::for_score(24.0), RiskTier::C);
        assert_eq!(RiskTier::for_score(23.999), RiskTier::D);
    }

    #[test]
    fn test_tier_d_forbidden() {
        let e = engine();
        let mut v = view(10_000.0);
        let err = e.assign(&candidate("p", 20.0), &mut v).unwrap_err();
        assert_eq!(err, RejectReason::TierForbidden);
        assert_eq!(v.total_positions, 0);
    }

    #[test]
    fn test_below_minimum_capital_gates_everything() {
        let e = engine();
        let mut v = view(400.0);
        let err = e.assign(&candidate("p", 50.0), &mut v).unwrap_err();
        assert_eq!(err, RejectReason::BelowMinimumCapital);
    }

    #[test]
    fn test_tier_a_midband_assignment() {
        // Score 50 sits halfway through the A band (40-60):
        // leverage 1.6, size cap 10%.
        let e = engine();
        let mut v = view(10_000.0);
        let a = e.assign(&candidate("p", 50.0), &mut v).unwrap();

        assert_eq!(a.tier, RiskTier::A);
        assert!((a.leverage - 1.6).abs() < 1e-10);
        assert!((a.size_cap_pct - 10.0).abs() < 1e-10);
        assert!((a.base_size_usd - 1_000.0).abs() < 1e-9);
        assert!((a.leveraged_size_usd - 1_600.0).abs() < 1e-9);
        assert!(!a.migration_penalty_applied);
        // 25% cap = 2500, ownership cap huge: final = leveraged.
        assert!((a.final_size_usd - 1_600.0).abs() < 1e-9);
        assert!((v.deployed_usd - 1_600.0).abs() < 1e-9);
    }

    #[test]
    fn test_tier_a_upper_band_matches_strong_pool_profile() {
        // Score 55: t = 0.75 -> leverage 1.7, size cap 11%.
        let e = engine();
        let mut v = view(10_000.0);
        let a = e.assign(&candidate("p", 55.0), &mut v).unwrap();
        assert!((a.leverage - 1.7).abs() < 1e-10);
        assert!((a.size_cap_pct - 11.0).abs() < 1e-10);
    }

    #[test]
    fn test_tier_c_sizing_for_marginal_score() {
        // Score 28 is mid-band C: size cap 4%, leverage 1.1.
        let e = engine();
        let mut v = view(10_000.0);
        let a = e.assign(&candidate("p", 28.0), &mut v).unwrap();
        assert_eq!(a.tier, RiskTier::C);
        assert!((a.size_cap_pct - 4.0).abs() < 1e-10);
        assert!((a.leverage - 1.1).abs() < 1e-10);
    }

    #[test]
    fn test_score_above_band_clamps() {
        let e = engine();
        let mut v = view(10_000.0);
        let a = e.assign(&candidate("p", 95.0), &mut v).unwrap();
        assert!((a.leverage - 1.8).abs() < 1e-10);
        assert!((a.size_cap_pct - 12.0).abs() < 1e-10);
    }

    #[test]
    fn test_migration_penalty_halves_size() {
        let e = engine();
        let mut v = view(10_000.0);
        let mut c = candidate("p", 50.0);
        c.liquidity_slope_per_min = -0.05;
        let a = e.assign(&c, &mut v).unwrap();
        assert!(a.migration_penalty_applied);
        assert!((a.final_size_usd - 800.0).abs() < 1e-9);
    }

    #[test]
    fn test_penalty_not_applied_at_mild_outflow() {
        let e = engine();
        let mut v = view(10_000.0);
        let mut c = candidate("p", 50.0);
        c.liquidity_slope_per_min = -0.01;
        let a = e.assign(&c, &mut v).unwrap();
        assert!(!a.migration_penalty_applied);
    }

    #[test]
    fn test_ownership_cap_limits_thin_pools() {
        let e = engine();
        let mut v = view(100_000.0);
        let mut c = candidate("p", 50.0);
        // Pool with only 5k TVL: 8% ownership cap = 400 USD.
        c.pool_tvl_usd = 5_000.0;
        let a = e.assign(&c, &mut v).unwrap();
        assert!((a.final_size_usd - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_remaining_capacity_capped() {
        let e = engine();
        let mut v = view(10_000.0);
        // Capacity = 2500; first position takes 1600.
        e.assign(&candidate("p1", 50.0), &mut v).unwrap();
        // Second wants 1600 but only 900 remains.
        let a = e.assign(&candidate("p2", 50.0), &mut v).unwrap();
        assert!((a.final_size_usd - 900.0).abs() < 1e-9);

        // Third finds the portfolio at max deployment.
        let err = e.assign(&candidate("p3", 50.0), &mut v).unwrap_err();
        assert_eq!(err, RejectReason::MaxDeployment);
    }

    #[test]
    fn test_tier_capacity_enforced() {
        let mut params = PortfolioParams::default();
        params.max_positions_per_tier = 2;
        // Raise deployment room so tier capacity is the binding limit.
        params.max_deployment_pct = 100.0;
        let e = RiskBucketEngine::new(params);
        let mut v = view(100_000.0);

        e.assign(&candidate("p1", 50.0), &mut v).unwrap();
        e.assign(&candidate("p2", 50.0), &mut v).unwrap();
        let err = e.assign(&candidate("p3", 50.0), &mut v).unwrap_err();
        assert_eq!(err, RejectReason::TierAtCapacity);
    }

    #[test]
    fn test_batch_assignment_consumes_capacity_in_order() {
        let e = engine();
        let v = view(10_000.0);
        let candidates = vec![
            candidate("best", 55.0),
            candidate("good", 45.0),
            candidate("ok", 33.0),
            candidate("bad", 20.0),
        ];
        let results = e.batch_assign(&candidates, &v);

        assert_eq!(results.len(), 4);
        assert!(results[0].1.is_ok());
        // "bad" is tier D regardless of remaining room.
        assert_eq!(results[3].1.as_ref().unwrap_err(), &RejectReason::TierForbidden);

        // The original view is untouched; batch works on a copy.
        assert!((v.deployed_usd - 0.0).abs() < f64::EPSILON);

        // Committed sizes never exceed the 25% cap in aggregate.
        let committed: f64 = results
            .iter()
            .filter_map(|(_, r)| r.as_ref().ok())
            .map(|a| a.final_size_usd)
            .sum();
        assert!(committed <= 2_500.0 + 1e-9);
    }
}
