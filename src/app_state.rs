// =============================================================================
// Central Application State — Meridian Liquidity Engine
// =============================================================================
//
// The dependency graph for the whole engine: every component is constructed
// exactly once here and handed down as an Arc. No module reads an ambient
// global — accessors that abort on uninitialised state do not exist in this
// codebase.
//
// Ownership boundaries (one owner per store, everyone else reads through
// accessors):
//   - SnapshotStore       owns per-pool history rings
//   - PortfolioLedger     owns capital totals
//   - AdaptivePoolUniverse owns pool-status transitions
//   - HarmonicStops       owns per-position health state
//   - SharpeMemory        owns per-pool performance statistics
//   - PositionBook        owns the open/closed position lists
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for all mutable shared collections.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::decision_envelope::DecisionEnvelope;
use crate::harmonic::HarmonicStops;
use crate::kill_switch::KillSwitch;
use crate::microstructure::TimeWeightTracker;
use crate::persistence::Journal;
use crate::position_engine::{ActivePosition, PositionBook};
use crate::regime::{RegimeGovernor, RegimeTransition};
use crate::risk::{LedgerSnapshot, PortfolioLedger, RiskBucketEngine};
use crate::runtime_config::RuntimeConfig;
use crate::scoring::{BootstrapScorer, Tier4Scorer};
use crate::telemetry::SnapshotStore;
use crate::types::PoolDescriptor;
use crate::universe::{AdaptivePoolUniverse, PoolStatus, SharpeMemory, UniverseEntry};

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;
/// Maximum number of recent decisions to retain.
const MAX_RECENT_DECISIONS: usize = 100;

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the status API error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Human-readable error message.
    pub message: String,
    /// Optional machine-readable code (e.g. a gate reason).
    pub code: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Monotonically increasing version counter, incremented on every
    /// meaningful state mutation.
    pub state_version: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    // ── Telemetry ───────────────────────────────────────────────────────
    pub snapshot_store: Arc<SnapshotStore>,
    /// Latest raw descriptors by pool address (fee tiers, 24h aggregates).
    pub descriptors: RwLock<HashMap<String, PoolDescriptor>>,

    // ── Scoring pipeline ────────────────────────────────────────────────
    pub scorer: Arc<Tier4Scorer>,
    pub bootstrap_scorer: Arc<BootstrapScorer>,
    pub time_weight: Arc<TimeWeightTracker>,
    /// Composite score per pool from the previous cycle (collapse
    /// detection input for the kill switch).
    pub last_scores: RwLock<HashMap<String, f64>>,

    // ── Regime ──────────────────────────────────────────────────────────
    pub governor: Arc<RegimeGovernor>,

    // ── Universe & memory ───────────────────────────────────────────────
    pub universe: Arc<AdaptivePoolUniverse>,
    pub sharpe_memory: Arc<SharpeMemory>,

    // ── Risk & capital ──────────────────────────────────────────────────
    pub ledger: Arc<PortfolioLedger>,
    pub bucket_engine: Arc<RiskBucketEngine>,

    // ── Positions & stops ───────────────────────────────────────────────
    pub position_book: Arc<PositionBook>,
    pub harmonic: Arc<HarmonicStops>,
    pub kill_switch: Arc<KillSwitch>,

    // ── Persistence ─────────────────────────────────────────────────────
    pub journal: Arc<Journal>,

    // ── Commit serialisation ────────────────────────────────────────────
    /// Held while a position open/close mutates ledger + book + harmonic
    /// state, and while consistency checks read across them, so no reader
    /// observes a half-applied commit.
    pub commit_lock: Arc<Mutex<()>>,

    // ── Entry pacing ────────────────────────────────────────────────────
    /// No entries before this time (playbook cooldowns, post-chaos).
    pub entry_cooldown_until_ms: RwLock<i64>,

    // ── Decision audit trail ────────────────────────────────────────────
    pub recent_decisions: RwLock<Vec<DecisionEnvelope>>,

    // ── Error log ───────────────────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    // ── Operational status ──────────────────────────────────────────────
    pub last_reconcile_ok: RwLock<Option<std::time::Instant>>,
    pub last_reconcile_error: RwLock<Option<String>>,

    // ── Timing ──────────────────────────────────────────────────────────
    /// Instant when the engine was started. Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct the full dependency graph from the runtime configuration.
    pub fn new(config: RuntimeConfig, journal_path: impl Into<std::path::PathBuf>) -> Self {
        let capital = config.effective_capital();
        let strict = config.strict_invariants;

        let snapshot_store = Arc::new(SnapshotStore::new(config.history_length));
        let scorer = Arc::new(Tier4Scorer::new());
        let bootstrap_scorer = Arc::new(BootstrapScorer::new(config.bootstrap_min_score));
        let time_weight = Arc::new(TimeWeightTracker::new());
        let governor = Arc::new(RegimeGovernor::new(config.hysteresis.clone(), now_ms()));
        let universe = Arc::new(AdaptivePoolUniverse::new(config.universe.clone()));
        let sharpe_memory = Arc::new(SharpeMemory::new(config.sharpe.clone()));
        let ledger = Arc::new(PortfolioLedger::new(capital, strict));
        let bucket_engine = Arc::new(RiskBucketEngine::new(config.portfolio.clone()));
        let position_book = Arc::new(PositionBook::new());
        let harmonic = Arc::new(HarmonicStops::new(config.harmonic.clone()));
        let kill_switch = Arc::new(KillSwitch::new(config.kill_switch.clone()));
        let journal = Arc::new(Journal::new(journal_path.into()));

        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            snapshot_store,
            descriptors: RwLock::new(HashMap::new()),
            scorer,
            bootstrap_scorer,
            time_weight,
            last_scores: RwLock::new(HashMap::new()),
            governor,
            universe,
            sharpe_memory,
            ledger,
            bucket_engine,
            position_book,
            harmonic,
            kill_switch,
            journal,
            commit_lock: Arc::new(Mutex::new(())),
            entry_cooldown_until_ms: RwLock::new(0),
            recent_decisions: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(Vec::new()),
            last_reconcile_ok: RwLock::new(None),
            last_reconcile_error: RwLock::new(None),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    /// Atomically increment the state version after a meaningful mutation.
    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Read the current state version without modifying it.
    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error message. The ring is capped at [`MAX_RECENT_ERRORS`].
    pub fn push_error(&self, msg: String) {
        self.push_error_with_code(msg, None);
    }

    /// Record an error with an optional machine-readable code.
    pub fn push_error_with_code(&self, msg: String, code: Option<String>) {
        let record = ErrorRecord {
            message: msg,
            code,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }

        self.increment_version();
    }

    // ── Decision Audit ──────────────────────────────────────────────────

    /// Record a decision envelope. The ring is capped at
    /// [`MAX_RECENT_DECISIONS`].
    pub fn push_decision(&self, envelope: DecisionEnvelope) {
        let mut decisions = self.recent_decisions.write();
        decisions.push(envelope);
        while decisions.len() > MAX_RECENT_DECISIONS {
            decisions.remove(0);
        }

        self.increment_version();
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Build a complete, serialisable snapshot of the engine state for the
    /// REST `GET /api/v1/state` endpoint.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let now = now_ms();
        let config = self.runtime_config.read();
        let version = self.current_state_version();

        // The position book is the "view"; the ledger is the truth. Taking
        // the commit lock ensures we never read across a half-applied
        // open or close. The strict assertion lives in the decision cycle;
        // the API only reports the comparison.
        let (ledger, positions, ledger_consistent) = {
            let _commit = self.commit_lock.lock();
            let ledger = self.ledger.snapshot();
            let positions = self.position_book.get_open_positions();
            let view_deployed: f64 = positions.iter().map(|p| p.size_usd).sum();
            let consistent = (view_deployed - ledger.deployed_usd).abs() <= 1.0;
            (ledger, positions, consistent)
        };

        let regime = RegimeSummary {
            regime: self.governor.current().to_string(),
            time_in_regime_ms: self.governor.time_in_regime(now),
            transitions: self.governor.transitions(),
        };

        let kill = KillSummary {
            in_cooldown: self.kill_switch.in_cooldown(now),
            last_reason: self.kill_switch.last_reason().map(|r| r.to_string()),
            kill_count: self.kill_switch.kill_count(),
        };

        let universe = self.build_universe_summary(now);

        let recent_decisions = self.recent_decisions.read().clone();
        let recent_errors = self.recent_errors.read().clone();

        let reconcile_last_ok_age_s = self
            .last_reconcile_ok
            .read()
            .map(|t| t.elapsed().as_secs());

        StateSnapshot {
            state_version: version,
            server_time: now,
            trading_mode: config.trading_mode.to_string(),
            account_mode: config.account_mode.to_string(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            ledger,
            ledger_consistent,
            positions,
            regime,
            kill,
            universe,
            recent_decisions,
            recent_errors,
            reconcile_last_ok_age_s,
            reconcile_last_error: self.last_reconcile_error.read().clone(),
        }
    }

    fn build_universe_summary(&self, now: i64) -> UniverseSummary {
        let ranked = self.universe.ranked(now);
        let mut by_status: HashMap<String, u32> = HashMap::new();
        for entry in &ranked {
            *by_status.entry(entry.status.to_string()).or_insert(0) += 1;
        }

        let active = ranked
            .iter()
            .filter(|e| e.status == PoolStatus::Active)
            .count() as u32;

        UniverseSummary {
            total: ranked.len() as u32,
            active,
            by_status,
            top: ranked.into_iter().take(10).collect(),
        }
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

/// Full engine state snapshot for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub trading_mode: String,
    pub account_mode: String,
    pub uptime_secs: u64,
    pub ledger: LedgerSnapshot,
    /// False when the position-book view diverged from the ledger (fatal
    /// in strict mode; surfaced here in non-strict deployments).
    pub ledger_consistent: bool,
    pub positions: Vec<ActivePosition>,
    pub regime: RegimeSummary,
    pub kill: KillSummary,
    pub universe: UniverseSummary,
    pub recent_decisions: Vec<DecisionEnvelope>,
    pub recent_errors: Vec<ErrorRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile_last_ok_age_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile_last_error: Option<String>,
}

/// Regime state for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct RegimeSummary {
    pub regime: String,
    pub time_in_regime_ms: i64,
    pub transitions: Vec<RegimeTransition>,
}

/// Kill-switch state for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct KillSummary {
    pub in_cooldown: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reason: Option<String>,
    pub kill_count: u32,
}

/// Universe state for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct UniverseSummary {
    pub total: u32,
    pub active: u32,
    pub by_status: HashMap<String, u32>,
    pub top: Vec<UniverseEntry>,
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        let path = std::env::temp_dir().join(format!(
            "meridian-appstate-test-{}.jsonl",
            uuid::Uuid::new_v4()
        ));
        AppState::new(RuntimeConfig::default(), path)
    }

    #[test]
    fn test_version_increments() {
        let s = state();
        let v0 = s.current_state_version();
        s.increment_version();
        assert_eq!(s.current_state_version(), v0 + 1);
    }

    #[test]
    fn test_error_ring_capped() {
        let s = state();
        for i in 0..80 {
            s.push_error(format!("error {i}"));
        }
        let errors = s.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(errors.last().unwrap().message, "error 79");
        // Oldest entries were evicted.
        assert_eq!(errors.first().unwrap().message, "error 30");
    }

    #[test]
    fn test_decision_ring_capped() {
        let s = state();
        for i in 0..150 {
            s.push_decision(DecisionEnvelope::allow(format!("pool-{i}"), 40.0, false));
        }
        assert_eq!(s.recent_decisions.read().len(), MAX_RECENT_DECISIONS);
    }

    #[test]
    fn test_snapshot_consistent_on_fresh_state() {
        let s = state();
        let snap = s.build_snapshot();
        assert!(snap.ledger_consistent);
        assert!(snap.positions.is_empty());
        assert_eq!(snap.regime.regime, "NEUTRAL");
        assert!(!snap.kill.in_cooldown);
        assert_eq!(snap.universe.total, 0);
        assert_eq!(snap.trading_mode, "Paused");
        assert_eq!(snap.account_mode, "Paper");
    }
}
