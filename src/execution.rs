// =============================================================================
// Execution Engine — routes deployments through the venue client, with full
// paper-mode simulation support
// =============================================================================
//
// Opening a position is a strict sequence so no downstream consumer ever
// observes partial state:
//
//   1. venue add-liquidity (or a simulated fill in paper mode)
//   2. ledger open (capital moves from available to deployed)
//   3. position book open (the position becomes visible)
//   4. harmonic baseline registration
//
// A failure at any step unwinds the earlier ones best-effort. Closing runs
// the inverse: claim fees, remove liquidity, close on venue, then ledger
// close + PnL mark, book close, harmonic release.
//
// The engine never retries venue calls; failed calls are logged and the
// reconcile loop heals any drift on the next pass.
// =============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::harmonic::{HarmonicBaseline, HarmonicStops};
use crate::microstructure::MomentumSlopes;
use crate::position_engine::{ActivePosition, BinRange, EntryContext, PositionBook};
use crate::regime::MacroRegime;
use crate::risk::{PortfolioLedger, RiskTier};
use crate::scoring::MigrationDirection;
use crate::venue::VenueClient;

// ---------------------------------------------------------------------------
// Proposal & result types
// ---------------------------------------------------------------------------

/// A fully sized deployment, ready for execution.
#[derive(Debug, Clone)]
pub struct DeployProposal {
    pub pool: String,
    pub tier: RiskTier,
    pub score: f64,
    pub entry_price: f64,
    pub size_usd: f64,
    pub bin_range: BinRange,
    pub regime: MacroRegime,
    pub migration: MigrationDirection,
    pub slopes: MomentumSlopes,
    pub baseline: HarmonicBaseline,
}

/// Outcome of an execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionResult {
    /// Liquidity deployed on the venue (live mode).
    Deployed(String),
    /// Deployment simulated locally (paper mode).
    Simulated(String),
    /// Deployment refused before any venue call.
    Blocked(String),
    /// A venue call or internal step failed.
    Failed(String),
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deployed(id) => write!(f, "Deployed({id})"),
            Self::Simulated(id) => write!(f, "Simulated({id})"),
            Self::Blocked(reason) => write!(f, "Blocked({reason})"),
            Self::Failed(err) => write!(f, "Failed({err})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Ties together the venue client, position book, ledger, and harmonic
/// state for every open and close.
pub struct ExecutionEngine {
    pub client: Arc<VenueClient>,
    pub position_book: Arc<PositionBook>,
    pub ledger: Arc<PortfolioLedger>,
    pub harmonic: Arc<HarmonicStops>,
    /// Serialises ledger + book + harmonic mutations so readers never see
    /// a half-applied commit. Never held across an await.
    commit_lock: Arc<Mutex<()>>,
}

impl ExecutionEngine {
    pub fn new(
        client: Arc<VenueClient>,
        position_book: Arc<PositionBook>,
        ledger: Arc<PortfolioLedger>,
        harmonic: Arc<HarmonicStops>,
        commit_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            client,
            position_book,
            ledger,
            harmonic,
            commit_lock,
        }
    }

    // -------------------------------------------------------------------------
    // Open
    // -------------------------------------------------------------------------

    /// Deploy a sized proposal. In paper mode no request reaches the venue
    /// and a synthetic handle is created.
    pub async fn open_liquidity_position(
        &self,
        proposal: &DeployProposal,
        paper: bool,
        now_ms: i64,
    ) -> ExecutionResult {
        if self.position_book.has_open_on_pool(&proposal.pool) {
            return ExecutionResult::Blocked(format!(
                "pool {} already has an open position",
                proposal.pool
            ));
        }

        // ── 1. Venue fill (or simulation) ───────────────────────────────
        let handle = if paper {
            format!("paper-{}", Uuid::new_v4())
        } else {
            match self
                .client
                .add_liquidity(&proposal.pool, proposal.bin_range, proposal.size_usd)
                .await
            {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(pool = %proposal.pool, error = %e, "add-liquidity failed");
                    return ExecutionResult::Failed(format!("add-liquidity: {e}"));
                }
            }
        };

        // ── 2-4. Ledger, book, harmonic — one atomic commit ─────────────
        let position = match self.commit_open(proposal, &handle, now_ms) {
            Ok(position) => position,
            Err(msg) => {
                if !paper {
                    self.unwind_venue(&handle).await;
                }
                return ExecutionResult::Failed(msg);
            }
        };

        info!(
            trade_id = %position.trade_id,
            pool = %proposal.pool,
            tier = %proposal.tier,
            size_usd = proposal.size_usd,
            paper,
            "liquidity position opened"
        );

        if paper {
            ExecutionResult::Simulated(position.trade_id)
        } else {
            ExecutionResult::Deployed(position.trade_id)
        }
    }

    /// Steps 2-4 of an open under the commit lock: ledger, book, harmonic.
    /// Purely synchronous so the lock is never held across an await. On
    /// failure the earlier steps are rolled back and the error message
    /// returned; the caller unwinds the venue side.
    fn commit_open(
        &self,
        proposal: &DeployProposal,
        handle: &str,
        now_ms: i64,
    ) -> Result<ActivePosition, String> {
        let _commit = self.commit_lock.lock();

        self.ledger
            .open(proposal.tier, proposal.size_usd)
            .map_err(|e| {
                error!(pool = %proposal.pool, error = %e, "ledger rejected open");
                format!("ledger: {e}")
            })?;

        let entry = EntryContext {
            pool_address: proposal.pool.clone(),
            tier: proposal.tier,
            entry_score: proposal.score,
            entry_price: proposal.entry_price,
            size_usd: proposal.size_usd,
            bin_range: proposal.bin_range,
            position_handle: handle.to_string(),
            regime: proposal.regime,
            migration: proposal.migration,
            slopes: proposal.slopes,
        };
        let position = match self.position_book.open_position(entry, now_ms) {
            Ok(p) => p,
            Err(e) => {
                error!(pool = %proposal.pool, error = %e, "position book rejected open");
                let _ = self.ledger.close(proposal.tier, proposal.size_usd);
                return Err(format!("position book: {e}"));
            }
        };

        if let Err(e) =
            self.harmonic
                .register(&position.trade_id, proposal.tier, proposal.baseline, now_ms)
        {
            // A duplicate trade id here means corrupt state; unwind fully.
            error!(trade_id = %position.trade_id, error = %e, "harmonic registration failed");
            let _ = self
                .position_book
                .close_position(&position.trade_id, "REGISTRATION_FAILED", 0.0, 0.0);
            let _ = self.ledger.close(proposal.tier, proposal.size_usd);
            return Err(format!("harmonic: {e}"));
        }

        Ok(position)
    }

    // -------------------------------------------------------------------------
    // Close
    // -------------------------------------------------------------------------

    /// Fully exit a position. Returns the closed record on success.
    pub async fn close_liquidity_position(
        &self,
        trade_id: &str,
        reason: &str,
        paper: bool,
    ) -> Option<ActivePosition> {
        let position = self.position_book.get_open(trade_id)?;

        // ── 1. Venue teardown ───────────────────────────────────────────
        let (withdrawn, fees) = if paper {
            // Paper fills return the committed size untouched.
            (position.size_usd, 0.0)
        } else {
            let fees = match self.client.claim_fees(&position.position_handle).await {
                Ok(f) => f,
                Err(e) => {
                    warn!(trade_id, error = %e, "claim-fees failed; continuing close");
                    0.0
                }
            };
            let withdrawn = match self
                .client
                .remove_liquidity(&position.position_handle)
                .await
            {
                Ok(w) => w,
                Err(e) => {
                    // Leave the position open; reconcile will surface the
                    // drift and the next cycle retries the close.
                    error!(trade_id, error = %e, "remove-liquidity failed; close aborted");
                    return None;
                }
            };
            if let Err(e) = self.client.close_position(&position.position_handle).await {
                warn!(trade_id, error = %e, "close-position failed; reconcile will heal");
            }
            (withdrawn, fees)
        };

        // ── 2-4. Book close, ledger close + PnL, harmonic release ───────
        // One atomic commit under the same lock as opens.
        let closed = {
            let _commit = self.commit_lock.lock();

            let closed = match self
                .position_book
                .close_position(trade_id, reason, withdrawn, fees)
            {
                Ok(p) => p,
                Err(e) => {
                    error!(trade_id, error = %e, "book close failed after venue teardown");
                    return None;
                }
            };

            if let Err(e) = self.ledger.close(closed.tier, closed.size_usd) {
                error!(trade_id, error = %e, "ledger close failed");
            }
            if let Err(e) = self.ledger.mark_pnl(closed.realized_pnl) {
                error!(trade_id, error = %e, "ledger pnl mark failed");
            }

            self.harmonic.release(trade_id);
            closed
        };

        info!(
            trade_id,
            pool = %closed.pool_address,
            reason,
            realized_pnl = closed.realized_pnl,
            "liquidity position fully exited"
        );
        Some(closed)
    }

    /// Claim fees for an open position without exiting (TP1).
    pub async fn claim_position_fees(&self, trade_id: &str, paper: bool) -> Option<f64> {
        let position = self.position_book.get_open(trade_id)?;
        let fees = if paper {
            0.0
        } else {
            match self.client.claim_fees(&position.position_handle).await {
                Ok(f) => f,
                Err(e) => {
                    warn!(trade_id, error = %e, "fee claim failed");
                    return None;
                }
            }
        };
        self.position_book.mark_took_profit_1(trade_id, fees);
        Some(fees)
    }

    /// Best-effort removal of venue liquidity after a failed internal open.
    async fn unwind_venue(&self, handle: &str) {
        if let Err(e) = self.client.remove_liquidity(handle).await {
            error!(handle, error = %e, "failed to unwind venue liquidity; reconcile will surface it");
        }
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("client", &"<VenueClient>")
            .field("position_book", &self.position_book)
            .field("ledger", &self.ledger)
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmonic::MicroObservation;
    use crate::runtime_config::HarmonicParams;

    fn engine() -> ExecutionEngine {
        ExecutionEngine::new(
            Arc::new(VenueClient::new("http://127.0.0.1:1", "k", "s", 1_000)),
            Arc::new(PositionBook::new()),
            Arc::new(PortfolioLedger::new(10_000.0, true)),
            Arc::new(HarmonicStops::new(HarmonicParams::default())),
            Arc::new(Mutex::new(())),
        )
    }

    fn proposal(pool: &str, size: f64) -> DeployProposal {
        DeployProposal {
            pool: pool.to_string(),
            tier: RiskTier::A,
            score: 48.0,
            entry_price: 1.0,
            size_usd: size,
            bin_range: BinRange::centred(100, 8),
            regime: MacroRegime::Neutral,
            migration: MigrationDirection::Neutral,
            slopes: MomentumSlopes::default(),
            baseline: HarmonicBaseline {
                observation: MicroObservation {
                    bin_velocity: 0.04,
                    swap_velocity: 0.2,
                    entropy: 0.7,
                    fee_intensity: 0.0006,
                    liquidity_usd: 100_000.0,
                },
                captured_at_ms: 0,
            },
        }
    }

    #[tokio::test]
    async fn test_paper_open_registers_everything() {
        let e = engine();
        let result = e.open_liquidity_position(&proposal("pool-a", 1_000.0), true, 1_000).await;

        let trade_id = match result {
            ExecutionResult::Simulated(id) => id,
            other => panic!("expected Simulated, got {other}"),
        };

        assert_eq!(e.position_book.open_count(), 1);
        assert!((e.ledger.snapshot().deployed_usd - 1_000.0).abs() < 1e-9);
        assert_eq!(e.harmonic.registered_trades(), vec![trade_id.clone()]);

        let pos = e.position_book.get_open(&trade_id).unwrap();
        assert!(pos.position_handle.starts_with("paper-"));
    }

    #[tokio::test]
    async fn test_paper_close_round_trips_ledger() {
        let e = engine();
        let result = e.open_liquidity_position(&proposal("pool-a", 1_000.0), true, 1_000).await;
        let trade_id = match result {
            ExecutionResult::Simulated(id) => id,
            other => panic!("unexpected {other}"),
        };

        let closed = e
            .close_liquidity_position(&trade_id, "HARMONIC_FULL_EXIT", true)
            .await
            .unwrap();

        // Paper fills return size exactly: zero PnL, totals restored.
        assert!((closed.realized_pnl - 0.0).abs() < 1e-9);
        let snap = e.ledger.snapshot();
        assert!((snap.deployed_usd - 0.0).abs() < 1e-9);
        assert!((snap.available_usd - 10_000.0).abs() < 1e-9);
        assert_eq!(e.position_book.open_count(), 0);
        assert!(e.harmonic.registered_trades().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_pool_open_blocked() {
        let e = engine();
        e.open_liquidity_position(&proposal("pool-a", 1_000.0), true, 1_000).await;
        let result = e.open_liquidity_position(&proposal("pool-a", 500.0), true, 2_000).await;
        assert!(matches!(result, ExecutionResult::Blocked(_)));
        assert_eq!(e.position_book.open_count(), 1);
        assert!((e.ledger.snapshot().deployed_usd - 1_000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_oversized_open_fails_and_unwinds() {
        let e = engine();
        let result = e
            .open_liquidity_position(&proposal("pool-a", 50_000.0), true, 1_000)
            .await;
        assert!(matches!(result, ExecutionResult::Failed(_)));
        assert_eq!(e.position_book.open_count(), 0);
        assert!(e.harmonic.registered_trades().is_empty());
        assert!((e.ledger.snapshot().deployed_usd - 0.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_close_unknown_trade_is_none() {
        let e = engine();
        assert!(e
            .close_liquidity_position("ghost", "manual", true)
            .await
            .is_none());
    }
}
