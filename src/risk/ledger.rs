// =============================================================================
// Portfolio Ledger — the single authoritative store of capital state
// =============================================================================
//
// Every open and close flows through the ledger; no other module may keep a
// shadow copy of the capital totals. The ledger maintains:
//
//   totalCapitalUsd = availableUsd + deployedUsd        (always)
//   deployedUsd     = sum of per-tier deployedUsd       (always)
//
// An assertion layer re-checks both identities after every mutation. In
// strict mode (development and paper trading) a violation panics — running
// on with corrupt capital state is worse than crashing. In non-strict mode
// the violation is logged at error level and surfaced to the kill switch
// via the returned error.
// =============================================================================

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::risk::bucket::RiskTier;

/// Tolerance for floating-point drift in the consistency identities.
const EPSILON_USD: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Per-tier deployment book.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TierBook {
    pub positions: u32,
    pub deployed_usd: f64,
}

/// Serialisable snapshot of the whole ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub total_capital_usd: f64,
    pub available_usd: f64,
    pub deployed_usd: f64,
    /// Indexed A, B, C, D.
    pub per_tier: [TierBook; 4],
    pub realized_pnl_usd: f64,
}

/// Ledger operation failures.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerError {
    InsufficientCapital { requested: f64, available: f64 },
    /// A close was issued against a tier book that never held that much.
    ExcessiveClose { tier: RiskTier, requested: f64, held: f64 },
    /// A consistency identity failed; capital state is corrupt.
    Invariant(String),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientCapital {
                requested,
                available,
            } => write!(
                f,
                "insufficient capital: requested {requested:.2}, available {available:.2}"
            ),
            Self::ExcessiveClose {
                tier,
                requested,
                held,
            } => write!(
                f,
                "excessive close on tier {tier}: requested {requested:.2}, held {held:.2}"
            ),
            Self::Invariant(msg) => write!(f, "ledger invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for LedgerError {}

struct Inner {
    total_capital_usd: f64,
    available_usd: f64,
    deployed_usd: f64,
    per_tier: [TierBook; 4],
    realized_pnl_usd: f64,
}

// ---------------------------------------------------------------------------
// PortfolioLedger
// ---------------------------------------------------------------------------

/// Thread-safe authoritative capital ledger.
pub struct PortfolioLedger {
    state: RwLock<Inner>,
    strict: bool,
}

impl PortfolioLedger {
    /// Seed the ledger with the operating capital. `strict` enables the
    /// panic-on-violation assertion layer.
    pub fn new(total_capital_usd: f64, strict: bool) -> Self {
        info!(
            total_capital_usd,
            strict, "portfolio ledger initialised"
        );
        Self {
            state: RwLock::new(Inner {
                total_capital_usd,
                available_usd: total_capital_usd,
                deployed_usd: 0.0,
                per_tier: [TierBook::default(); 4],
                realized_pnl_usd: 0.0,
            }),
            strict,
        }
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Move `size_usd` from available to deployed under `tier`.
    pub fn open(&self, tier: RiskTier, size_usd: f64) -> Result<(), LedgerError> {
        let mut s = self.state.write();

        if size_usd > s.available_usd + EPSILON_USD {
            return Err(LedgerError::InsufficientCapital {
                requested: size_usd,
                available: s.available_usd,
            });
        }

        s.available_usd -= size_usd;
        s.deployed_usd += size_usd;
        let book = &mut s.per_tier[tier_index(tier)];
        book.positions += 1;
        book.deployed_usd += size_usd;

        debug!(
            %tier,
            size_usd,
            deployed = s.deployed_usd,
            available = s.available_usd,
            "ledger open"
        );
        self.check(&s)
    }

    /// Return `size_usd` from deployed to available under `tier`.
    pub fn close(&self, tier: RiskTier, size_usd: f64) -> Result<(), LedgerError> {
        let mut s = self.state.write();

        let book = &mut s.per_tier[tier_index(tier)];
        if size_usd > book.deployed_usd + EPSILON_USD || book.positions == 0 {
            return Err(LedgerError::ExcessiveClose {
                tier,
                requested: size_usd,
                held: book.deployed_usd,
            });
        }

        book.positions -= 1;
        book.deployed_usd -= size_usd;
        s.deployed_usd -= size_usd;
        s.available_usd += size_usd;

        debug!(
            %tier,
            size_usd,
            deployed = s.deployed_usd,
            available = s.available_usd,
            "ledger close"
        );
        self.check(&s)
    }

    /// Apply realised PnL (positive or negative) to the capital base.
    pub fn mark_pnl(&self, delta_usd: f64) -> Result<(), LedgerError> {
        let mut s = self.state.write();
        s.total_capital_usd += delta_usd;
        s.available_usd += delta_usd;
        s.realized_pnl_usd += delta_usd;

        debug!(
            delta_usd,
            total = s.total_capital_usd,
            realized = s.realized_pnl_usd,
            "ledger pnl marked"
        );
        self.check(&s)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Consistent snapshot of the ledger.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let s = self.state.read();
        LedgerSnapshot {
            total_capital_usd: s.total_capital_usd,
            available_usd: s.available_usd,
            deployed_usd: s.deployed_usd,
            per_tier: s.per_tier,
            realized_pnl_usd: s.realized_pnl_usd,
        }
    }

    /// Cross-check an external view against the ledger. A view reporting
    /// zero deployment while the ledger holds capital is the classic
    /// shadow-total bug and is treated as fatal.
    pub fn verify_view(&self, view_deployed_usd: f64) -> Result<(), LedgerError> {
        let s = self.state.read();
        if view_deployed_usd.abs() < EPSILON_USD && s.deployed_usd > EPSILON_USD {
            let msg = format!(
                "view reports zero deployment while ledger holds {:.2} deployed",
                s.deployed_usd
            );
            return self.violated(msg);
        }
        if (view_deployed_usd - s.deployed_usd).abs() > 1.0 {
            let msg = format!(
                "view deployment {:.2} diverges from ledger {:.2}",
                view_deployed_usd, s.deployed_usd
            );
            return self.violated(msg);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Assertion layer
    // -------------------------------------------------------------------------

    fn check(&self, s: &Inner) -> Result<(), LedgerError> {
        let tier_sum: f64 = s.per_tier.iter().map(|b| b.deployed_usd).sum();
        if (tier_sum - s.deployed_usd).abs() > EPSILON_USD {
            return self.violated(format!(
                "tier sum {:.6} != deployed {:.6}",
                tier_sum, s.deployed_usd
            ));
        }

        let identity = s.available_usd + s.deployed_usd;
        if (identity - s.total_capital_usd).abs() > EPSILON_USD {
            return self.violated(format!(
                "available {:.6} + deployed {:.6} != total {:.6}",
                s.available_usd, s.deployed_usd, s.total_capital_usd
            ));
        }

        if s.available_usd < -EPSILON_USD || s.deployed_usd < -EPSILON_USD {
            return self.violated(format!(
                "negative balance: available {:.6}, deployed {:.6}",
                s.available_usd, s.deployed_usd
            ));
        }

        Ok(())
    }

    fn violated(&self, msg: String) -> Result<(), LedgerError> {
        error!("LEDGER INVARIANT VIOLATION: {msg}");
        if self.strict {
            panic!("ledger invariant violated: {msg}");
        }
        Err(LedgerError::Invariant(msg))
    }
}

fn tier_index(tier: RiskTier) -> usize {
    match tier {
        RiskTier::A => 0,
        RiskTier::B => 1,
        RiskTier::C => 2,
        RiskTier::D => 3,
    }
}

impl std::fmt::Debug for PortfolioLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state.read();
        f.debug_struct("PortfolioLedger")
            .field("total", &s.total_capital_usd)
            .field("available", &s.available_usd)
            .field("deployed", &s.deployed_usd)
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_close_restore_totals() {
        let ledger = PortfolioLedger::new(10_000.0, true);

        ledger.open(RiskTier::A, 1_500.0).unwrap();
        let snap = ledger.snapshot();
        assert!((snap.available_usd - 8_500.0).abs() < 1e-9);
        assert!((snap.deployed_usd - 1_500.0).abs() < 1e-9);
        assert_eq!(snap.per_tier[0].positions, 1);

        ledger.close(RiskTier::A, 1_500.0).unwrap();
        let snap = ledger.snapshot();
        assert!((snap.available_usd - 10_000.0).abs() < 1e-9);
        assert!((snap.deployed_usd - 0.0).abs() < 1e-9);
        assert_eq!(snap.per_tier[0].positions, 0);
    }

    #[test]
    fn test_open_close_with_pnl_round_trip() {
        // Open then close leaves totals at pre-open values plus the PnL
        // marked exactly once.
        let ledger = PortfolioLedger::new(10_000.0, true);
        ledger.open(RiskTier::B, 800.0).unwrap();
        ledger.close(RiskTier::B, 800.0).unwrap();
        ledger.mark_pnl(42.0).unwrap();

        let snap = ledger.snapshot();
        assert!((snap.total_capital_usd - 10_042.0).abs() < 1e-9);
        assert!((snap.available_usd - 10_042.0).abs() < 1e-9);
        assert!((snap.realized_pnl_usd - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_insufficient_capital_rejected() {
        let ledger = PortfolioLedger::new(1_000.0, true);
        let err = ledger.open(RiskTier::A, 2_000.0).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientCapital { .. }));

        // State untouched.
        let snap = ledger.snapshot();
        assert!((snap.available_usd - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_excessive_close_rejected() {
        let ledger = PortfolioLedger::new(10_000.0, true);
        ledger.open(RiskTier::C, 300.0).unwrap();
        let err = ledger.close(RiskTier::C, 900.0).unwrap_err();
        assert!(matches!(err, LedgerError::ExcessiveClose { .. }));

        // Closing against the wrong tier is also an excessive close.
        let err = ledger.close(RiskTier::A, 300.0).unwrap_err();
        assert!(matches!(err, LedgerError::ExcessiveClose { .. }));
    }

    #[test]
    fn test_tier_sums_match_global_deployed() {
        let ledger = PortfolioLedger::new(100_000.0, true);
        ledger.open(RiskTier::A, 5_000.0).unwrap();
        ledger.open(RiskTier::B, 3_000.0).unwrap();
        ledger.open(RiskTier::C, 1_000.0).unwrap();
        ledger.close(RiskTier::B, 3_000.0).unwrap();

        let snap = ledger.snapshot();
        let tier_sum: f64 = snap.per_tier.iter().map(|b| b.deployed_usd).sum();
        assert!((tier_sum - snap.deployed_usd).abs() < 1e-9);
        assert!(snap.available_usd + snap.deployed_usd <= snap.total_capital_usd + 1e-9);
    }

    #[test]
    fn test_negative_pnl_reduces_capital() {
        let ledger = PortfolioLedger::new(10_000.0, true);
        ledger.mark_pnl(-250.0).unwrap();
        let snap = ledger.snapshot();
        assert!((snap.total_capital_usd - 9_750.0).abs() < 1e-9);
        assert!((snap.realized_pnl_usd + 250.0).abs() < 1e-9);
    }

    #[test]
    #[should_panic(expected = "ledger invariant violated")]
    fn test_strict_mode_zero_view_panics() {
        // A dashboard view claiming zero deployment while capital is
        // deployed must crash the process in strict mode.
        let ledger = PortfolioLedger::new(10_000.0, true);
        ledger.open(RiskTier::A, 1_000.0).unwrap();
        let _ = ledger.verify_view(0.0);
    }

    #[test]
    fn test_non_strict_mode_zero_view_errors() {
        let ledger = PortfolioLedger::new(10_000.0, false);
        ledger.open(RiskTier::A, 1_000.0).unwrap();
        let err = ledger.verify_view(0.0).unwrap_err();
        assert!(matches!(err, LedgerError::Invariant(_)));
    }

    #[test]
    fn test_matching_view_passes() {
        let ledger = PortfolioLedger::new(10_000.0, true);
        ledger.open(RiskTier::A, 1_000.0).unwrap();
        ledger.verify_view(1_000.0).unwrap();
        // Zero view against zero deployment is fine too.
        ledger.close(RiskTier::A, 1_000.0).unwrap();
        ledger.verify_view(0.0).unwrap();
    }
}
