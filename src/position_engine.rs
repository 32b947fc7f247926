// =============================================================================
// Position Engine — state machine for open / closed liquidity positions
// =============================================================================
//
// Life-cycle:
//   Open  ->  Closed (harmonic stop / playbook exit / kill switch / manual)
//
// Take-profit flags are set along the way: TP1 claims accrued fees, TP2
// (extended targets only) halves the range exposure. Neither changes
// `size_usd` — the size committed at entry is immutable until exit.
//
// Invariants owned here:
//   - Exactly one open position per pool address.
//   - `size_usd` and the entry context (score, regime, slopes) never change
//     after open.
//
// Thread-safety: all mutable state is behind `parking_lot::RwLock`.
// =============================================================================

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::microstructure::MomentumSlopes;
use crate::regime::MacroRegime;
use crate::risk::RiskTier;
use crate::scoring::MigrationDirection;

// ---------------------------------------------------------------------------
// Position model
// ---------------------------------------------------------------------------

/// Symmetric bin range deployed around the active bin at entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinRange {
    pub lower: i32,
    pub upper: i32,
}

impl BinRange {
    /// Build a symmetric range of `width` bins centred on `active_bin`.
    pub fn centred(active_bin: i32, width: u32) -> Self {
        let half = (width / 2) as i32;
        Self {
            lower: active_bin - half,
            upper: active_bin + half,
        }
    }

    pub fn width(&self) -> u32 {
        (self.upper - self.lower).unsigned_abs()
    }

    pub fn contains(&self, bin: i32) -> bool {
        bin >= self.lower && bin <= self.upper
    }
}

impl std::fmt::Display for BinRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

/// Current status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// A single tracked liquidity position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivePosition {
    /// Unique trade identifier (UUID v4). Harmonic state and the ledger
    /// reference positions by this id, never by pointer.
    pub trade_id: String,
    pub pool_address: String,
    pub tier: RiskTier,
    /// Unix ms at entry.
    pub entry_time_ms: i64,
    pub entry_score: f64,
    /// Venue quote for the active bin price at entry.
    pub entry_price: f64,
    /// Capital committed at entry. Immutable until exit.
    pub size_usd: f64,
    /// Highest composite score seen while open.
    pub peak_score: f64,
    pub bin_range: BinRange,
    /// Opaque venue handle for the deployed liquidity.
    pub position_handle: String,
    /// Cycles survived since entry.
    pub consecutive_cycles: u32,
    #[serde(default)]
    pub took_profit_1: bool,
    #[serde(default)]
    pub took_profit_2: bool,
    pub regime_at_entry: MacroRegime,
    pub migration_at_entry: MigrationDirection,
    pub slopes_at_entry: MomentumSlopes,
    pub status: PositionStatus,
    pub opened_at: String,
    #[serde(default)]
    pub closed_at: Option<String>,
    #[serde(default)]
    pub close_reason: Option<String>,
    /// Liquidity returned by the venue at close.
    #[serde(default)]
    pub withdrawn_usd: f64,
    /// Fees claimed over the position's life.
    #[serde(default)]
    pub fees_claimed_usd: f64,
    #[serde(default)]
    pub realized_pnl: f64,
}

/// Entry context handed to `open_position`.
#[derive(Debug, Clone)]
pub struct EntryContext {
    pub pool_address: String,
    pub tier: RiskTier,
    pub entry_score: f64,
    pub entry_price: f64,
    pub size_usd: f64,
    pub bin_range: BinRange,
    pub position_handle: String,
    pub regime: MacroRegime,
    pub migration: MigrationDirection,
    pub slopes: MomentumSlopes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionError {
    /// A second open on the same pool would corrupt per-pool accounting.
    DuplicateOpen(String),
    NotFound(String),
}

impl std::fmt::Display for PositionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateOpen(pool) => write!(f, "pool {pool} already has an open position"),
            Self::NotFound(id) => write!(f, "no open position with trade id {id}"),
        }
    }
}

impl std::error::Error for PositionError {}

// ---------------------------------------------------------------------------
// Position Book
// ---------------------------------------------------------------------------

/// Thread-safe owner of the open and closed position lists.
pub struct PositionBook {
    open: RwLock<Vec<ActivePosition>>,
    closed: RwLock<Vec<ActivePosition>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self {
            open: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Open
    // -------------------------------------------------------------------------

    /// Open a new position and return it. Fails when the pool already has
    /// an open position.
    pub fn open_position(
        &self,
        ctx: EntryContext,
        now_ms: i64,
    ) -> Result<ActivePosition, PositionError> {
        let mut open = self.open.write();
        if open.iter().any(|p| p.pool_address == ctx.pool_address) {
            return Err(PositionError::DuplicateOpen(ctx.pool_address));
        }

        let trade_id = Uuid::new_v4().to_string();
        let position = ActivePosition {
            trade_id: trade_id.clone(),
            pool_address: ctx.pool_address,
            tier: ctx.tier,
            entry_time_ms: now_ms,
            entry_score: ctx.entry_score,
            entry_price: ctx.entry_price,
            size_usd: ctx.size_usd,
            peak_score: ctx.entry_score,
            bin_range: ctx.bin_range,
            position_handle: ctx.position_handle,
            consecutive_cycles: 0,
            took_profit_1: false,
            took_profit_2: false,
            regime_at_entry: ctx.regime,
            migration_at_entry: ctx.migration,
            slopes_at_entry: ctx.slopes,
            status: PositionStatus::Open,
            opened_at: Utc::now().to_rfc3339(),
            closed_at: None,
            close_reason: None,
            withdrawn_usd: 0.0,
            fees_claimed_usd: 0.0,
            realized_pnl: 0.0,
        };

        info!(
            trade_id = %trade_id,
            pool = %position.pool_address,
            tier = %position.tier,
            size_usd = position.size_usd,
            range = %position.bin_range,
            score = format!("{:.1}", position.entry_score),
            regime = %position.regime_at_entry,
            "position opened"
        );

        open.push(position.clone());
        Ok(position)
    }

    // -------------------------------------------------------------------------
    // Per-cycle updates
    // -------------------------------------------------------------------------

    /// Advance the cycle counter and peak score for an open position.
    pub fn mark_cycle(&self, trade_id: &str, current_score: f64) {
        let mut open = self.open.write();
        if let Some(pos) = open.iter_mut().find(|p| p.trade_id == trade_id) {
            pos.consecutive_cycles += 1;
            if current_score > pos.peak_score {
                pos.peak_score = current_score;
            }
        }
    }

    /// Record a TP1 fee claim.
    pub fn mark_took_profit_1(&self, trade_id: &str, fees_usd: f64) {
        let mut open = self.open.write();
        if let Some(pos) = open.iter_mut().find(|p| p.trade_id == trade_id) {
            pos.took_profit_1 = true;
            pos.fees_claimed_usd += fees_usd;
            info!(trade_id, fees_usd, "TP1: fees claimed");
        }
    }

    /// Record a TP2 range reduction.
    pub fn mark_took_profit_2(&self, trade_id: &str) {
        let mut open = self.open.write();
        if let Some(pos) = open.iter_mut().find(|p| p.trade_id == trade_id) {
            pos.took_profit_2 = true;
            info!(trade_id, "TP2: extended target hit");
        }
    }

    // -------------------------------------------------------------------------
    // Close
    // -------------------------------------------------------------------------

    /// Close a position and move it to the closed list. Realised PnL is
    /// `withdrawn + total fees - size`.
    pub fn close_position(
        &self,
        trade_id: &str,
        reason: &str,
        withdrawn_usd: f64,
        fees_usd: f64,
    ) -> Result<ActivePosition, PositionError> {
        let mut open = self.open.write();
        let idx = open
            .iter()
            .position(|p| p.trade_id == trade_id)
            .ok_or_else(|| PositionError::NotFound(trade_id.to_string()))?;
        let mut pos = open.remove(idx);
        drop(open);

        pos.fees_claimed_usd += fees_usd;
        pos.withdrawn_usd = withdrawn_usd;
        pos.realized_pnl = withdrawn_usd + pos.fees_claimed_usd - pos.size_usd;
        pos.status = PositionStatus::Closed;
        pos.closed_at = Some(Utc::now().to_rfc3339());
        pos.close_reason = Some(reason.to_string());

        info!(
            trade_id,
            pool = %pos.pool_address,
            reason,
            withdrawn_usd,
            fees = pos.fees_claimed_usd,
            realized_pnl = pos.realized_pnl,
            cycles = pos.consecutive_cycles,
            "position closed"
        );

        self.closed.write().push(pos.clone());
        Ok(pos)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn get_open_positions(&self) -> Vec<ActivePosition> {
        self.open.read().clone()
    }

    pub fn get_open(&self, trade_id: &str) -> Option<ActivePosition> {
        self.open
            .read()
            .iter()
            .find(|p| p.trade_id == trade_id)
            .cloned()
    }

    pub fn get_open_by_pool(&self, pool: &str) -> Option<ActivePosition> {
        self.open
            .read()
            .iter()
            .find(|p| p.pool_address == pool)
            .cloned()
    }

    pub fn has_open_on_pool(&self, pool: &str) -> bool {
        self.open.read().iter().any(|p| p.pool_address == pool)
    }

    pub fn open_count(&self) -> usize {
        self.open.read().len()
    }

    /// The most recent `count` closed positions (newest first).
    pub fn get_closed_positions(&self, count: usize) -> Vec<ActivePosition> {
        let closed = self.closed.read();
        closed.iter().rev().take(count).cloned().collect()
    }

    /// Venue handles for every open position (reconciliation input).
    pub fn open_handles(&self) -> Vec<String> {
        self.open
            .read()
            .iter()
            .map(|p| p.position_handle.clone())
            .collect()
    }
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PositionBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionBook")
            .field("open", &self.open.read().len())
            .field("closed", &self.closed.read().len())
            .finish()
    }
}

/// Warn-level audit used by reconciliation when the venue disagrees with
/// the book; never mutates state.
pub fn log_handle_drift(book_handles: &[String], venue_handles: &[String]) -> (u32, u32) {
    let mut missing_on_venue = 0;
    for handle in book_handles {
        if !venue_handles.contains(handle) {
            warn!(handle = %handle, "position handle missing on venue");
            missing_on_venue += 1;
        }
    }
    let mut orphaned_on_venue = 0;
    for handle in venue_handles {
        if !book_handles.contains(handle) {
            warn!(handle = %handle, "venue holds a handle the book does not know");
            orphaned_on_venue += 1;
        }
    }
    (missing_on_venue, orphaned_on_venue)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pool: &str, size: f64) -> EntryContext {
        EntryContext {
            pool_address: pool.to_string(),
            tier: RiskTier::A,
            entry_score: 48.0,
            entry_price: 1.25,
            size_usd: size,
            bin_range: BinRange::centred(100, 8),
            position_handle: format!("handle-{pool}"),
            regime: MacroRegime::Neutral,
            migration: MigrationDirection::Neutral,
            slopes: MomentumSlopes::default(),
        }
    }

    #[test]
    fn test_open_and_close_round_trip() {
        let book = PositionBook::new();
        let pos = book.open_position(ctx("pool-a", 1_000.0), 1_000).unwrap();
        assert_eq!(book.open_count(), 1);
        assert_eq!(pos.status, PositionStatus::Open);
        assert_eq!(pos.consecutive_cycles, 0);

        let closed = book
            .close_position(&pos.trade_id, "HARMONIC_FULL_EXIT", 980.0, 35.0)
            .unwrap();
        assert_eq!(book.open_count(), 0);
        assert_eq!(closed.status, PositionStatus::Closed);
        // 980 withdrawn + 35 fees - 1000 size = +15.
        assert!((closed.realized_pnl - 15.0).abs() < 1e-9);
        assert_eq!(closed.close_reason.as_deref(), Some("HARMONIC_FULL_EXIT"));
        assert_eq!(book.get_closed_positions(10).len(), 1);
    }

    #[test]
    fn test_duplicate_open_on_pool_rejected() {
        let book = PositionBook::new();
        book.open_position(ctx("pool-a", 1_000.0), 1_000).unwrap();
        let err = book.open_position(ctx("pool-a", 500.0), 2_000).unwrap_err();
        assert!(matches!(err, PositionError::DuplicateOpen(_)));
        assert_eq!(book.open_count(), 1);
    }

    #[test]
    fn test_close_unknown_trade_errors() {
        let book = PositionBook::new();
        let err = book.close_position("ghost", "manual", 0.0, 0.0).unwrap_err();
        assert!(matches!(err, PositionError::NotFound(_)));
    }

    #[test]
    fn test_cycle_marking_tracks_peak_score() {
        let book = PositionBook::new();
        let pos = book.open_position(ctx("pool-a", 1_000.0), 1_000).unwrap();

        book.mark_cycle(&pos.trade_id, 55.0);
        book.mark_cycle(&pos.trade_id, 42.0);

        let updated = book.get_open(&pos.trade_id).unwrap();
        assert_eq!(updated.consecutive_cycles, 2);
        assert!((updated.peak_score - 55.0).abs() < f64::EPSILON);
        // Size is untouched by cycle marking.
        assert!((updated.size_usd - 1_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_take_profit_flags_accumulate_fees() {
        let book = PositionBook::new();
        let pos = book.open_position(ctx("pool-a", 1_000.0), 1_000).unwrap();

        book.mark_took_profit_1(&pos.trade_id, 12.0);
        book.mark_took_profit_2(&pos.trade_id);

        let updated = book.get_open(&pos.trade_id).unwrap();
        assert!(updated.took_profit_1);
        assert!(updated.took_profit_2);
        assert!((updated.fees_claimed_usd - 12.0).abs() < 1e-9);

        // Fees claimed mid-life count once in the final PnL.
        let closed = book
            .close_position(&pos.trade_id, "PLAYBOOK_EXIT", 990.0, 5.0)
            .unwrap();
        assert!((closed.fees_claimed_usd - 17.0).abs() < 1e-9);
        assert!((closed.realized_pnl - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_bin_range_geometry() {
        let range = BinRange::centred(100, 8);
        assert_eq!(range.lower, 96);
        assert_eq!(range.upper, 104);
        assert_eq!(range.width(), 8);
        assert!(range.contains(100));
        assert!(range.contains(96));
        assert!(!range.contains(105));
    }

    #[test]
    fn test_open_handles_for_reconcile() {
        let book = PositionBook::new();
        book.open_position(ctx("a", 100.0), 1_000).unwrap();
        book.open_position(ctx("b", 100.0), 1_000).unwrap();

        let mut handles = book.open_handles();
        handles.sort();
        assert_eq!(handles, vec!["handle-a".to_string(), "handle-b".to_string()]);
    }

    #[test]
    fn test_handle_drift_detection() {
        let book = vec!["h1".to_string(), "h2".to_string()];
        let venue = vec!["h2".to_string(), "h3".to_string()];
        let (missing, orphaned) = log_handle_drift(&book, &venue);
        assert_eq!(missing, 1);
        assert_eq!(orphaned, 1);
    }
}
