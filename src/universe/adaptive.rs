// =============================================================================
// Adaptive Pool Universe — lifecycle state machine over tracked pools
// =============================================================================
//
// Per-pool status transitions, driven by Sharpe memory and discovery scores:
//
//   DISCOVERY -> ACTIVE      sharpe >= 0.5 with enough trades
//   ACTIVE    -> PROBATION   sharpe < 0.3 (after enough trades)
//   PROBATION -> ACTIVE      sharpe recovers above 0.5
//   any non-BLOCKED -> BLOCKED   sharpe < -1.0 (block_count += 1)
//   BLOCKED   -> PROBATION   after the block-review window (gives the pool
//                            another chance while block_count < max)
//   BLOCKED   -> deleted     block_count >= max_block_count
//   any (except BLOCKED) -> EXPIRED  inactive longer than stale_time_ms
//
// Priority score ranks candidates each cycle:
//
//   priority = (normSharpe*0.5 + min(1, discovery/100)*0.3
//               + exp(-hoursSinceActivity/24)*0.2) * statusMultiplier
//
// All transitions are recorded as ordered events.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::runtime_config::UniverseParams;
use crate::universe::sharpe_memory::SharpeMemory;

/// Sharpe at or above which a pool graduates to ACTIVE.
const ACTIVATION_SHARPE: f64 = 0.5;
/// Sharpe below which an ACTIVE pool drops to PROBATION.
const PROBATION_SHARPE: f64 = 0.3;
/// Sharpe below which any pool is BLOCKED.
const BLOCK_SHARPE: f64 = -1.0;

/// Fraction of the stale window after which a blocked pool is re-reviewed.
const BLOCK_REVIEW_DIVISOR: u64 = 4;

/// Maximum transition events retained in memory.
const MAX_EVENTS: usize = 500;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Lifecycle status of a pool in the universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolStatus {
    Discovery,
    Active,
    Probation,
    Blocked,
    Expired,
}

impl PoolStatus {
    /// Multiplier applied to the priority score for this status.
    pub fn multiplier(self) -> f64 {
        match self {
            Self::Active => 1.0,
            Self::Discovery => 0.7,
            Self::Probation => 0.5,
            Self::Blocked | Self::Expired => 0.0,
        }
    }
}

impl std::fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovery => write!(f, "DISCOVERY"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Probation => write!(f, "PROBATION"),
            Self::Blocked => write!(f, "BLOCKED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// One tracked pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseEntry {
    pub address: String,
    pub name: String,
    pub status: PoolStatus,
    pub sharpe_score: f64,
    pub normalized_sharpe: f64,
    pub discovery_score: f64,
    pub priority_score: f64,
    pub trade_count: u32,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub added_time_ms: i64,
    pub last_activity_ms: i64,
    pub block_count: u32,
    /// Where the pool came from (e.g. "listing", "operator").
    pub origin: String,
    /// Set when the pool entered BLOCKED, for the review window.
    #[serde(default)]
    blocked_at_ms: Option<i64>,
}

/// One recorded status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseEvent {
    pub pool: String,
    pub from: PoolStatus,
    pub to: PoolStatus,
    pub at_ms: i64,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// AdaptivePoolUniverse
// ---------------------------------------------------------------------------

/// Thread-safe universe. Owns all pool-status transitions.
pub struct AdaptivePoolUniverse {
    params: UniverseParams,
    entries: RwLock<HashMap<String, UniverseEntry>>,
    events: RwLock<Vec<UniverseEvent>>,
}

impl AdaptivePoolUniverse {
    pub fn new(params: UniverseParams) -> Self {
        Self {
            params,
            entries: RwLock::new(HashMap::new()),
            events: RwLock::new(Vec::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Ingest & activity
    // -------------------------------------------------------------------------

    /// Add a newly discovered pool in DISCOVERY, or refresh the activity
    /// timestamp and discovery score of an existing entry.
    pub fn ingest(
        &self,
        address: &str,
        name: &str,
        discovery_score: f64,
        origin: &str,
        now_ms: i64,
    ) {
        let mut entries = self.entries.write();
        match entries.get_mut(address) {
            Some(entry) => {
                entry.discovery_score = discovery_score;
                entry.last_activity_ms = now_ms;
            }
            None => {
                debug!(pool = address, origin, "pool ingested into universe");
                entries.insert(
                    address.to_string(),
                    UniverseEntry {
                        address: address.to_string(),
                        name: name.to_string(),
                        status: PoolStatus::Discovery,
                        sharpe_score: 0.0,
                        normalized_sharpe: 0.0,
                        discovery_score,
                        priority_score: 0.0,
                        trade_count: 0,
                        win_rate: 0.0,
                        total_pnl: 0.0,
                        added_time_ms: now_ms,
                        last_activity_ms: now_ms,
                        block_count: 0,
                        origin: origin.to_string(),
                        blocked_at_ms: None,
                    },
                );
            }
        }
    }

    /// Mark a pool as active right now (snapshot arrived, trade opened).
    pub fn touch(&self, address: &str, now_ms: i64) {
        if let Some(entry) = self.entries.write().get_mut(address) {
            entry.last_activity_ms = now_ms;
        }
    }

    // -------------------------------------------------------------------------
    // Performance-driven transitions
    // -------------------------------------------------------------------------

    /// Apply the latest Sharpe-memory view of a pool and run the status
    /// machine. Call once per pool per cycle (and after every closed trade).
    pub fn apply_performance(
        &self,
        address: &str,
        sharpe: f64,
        trade_count: u32,
        win_rate: f64,
        total_pnl: f64,
        now_ms: i64,
    ) {
        let mut transition: Option<(PoolStatus, PoolStatus, String)> = None;

        {
            let mut entries = self.entries.write();
            let Some(entry) = entries.get_mut(address) else {
                return;
            };

            entry.sharpe_score = sharpe;
            entry.normalized_sharpe = SharpeMemory::normalized_sharpe(sharpe);
            entry.trade_count = trade_count;
            entry.win_rate = win_rate;
            entry.total_pnl = total_pnl;

            let enough_trades = trade_count >= self.params.min_trades_for_activation;
            let from = entry.status;
            let to = match entry.status {
                PoolStatus::Blocked => PoolStatus::Blocked,
                _ if sharpe < BLOCK_SHARPE && enough_trades => {
                    entry.block_count += 1;
                    entry.blocked_at_ms = Some(now_ms);
                    PoolStatus::Blocked
                }
                PoolStatus::Discovery if sharpe >= ACTIVATION_SHARPE && enough_trades => {
                    PoolStatus::Active
                }
                PoolStatus::Active if sharpe < PROBATION_SHARPE && enough_trades => {
                    PoolStatus::Probation
                }
                PoolStatus::Probation if sharpe >= ACTIVATION_SHARPE && enough_trades => {
                    PoolStatus::Active
                }
                other => other,
            };

            if to != from {
                entry.status = to;
                transition = Some((from, to, format!("sharpe {:.2}", sharpe)));
            }
        }

        if let Some((from, to, reason)) = transition {
            self.push_event(address, from, to, now_ms, reason);
        }
    }

    // -------------------------------------------------------------------------
    // Maintenance sweep
    // -------------------------------------------------------------------------

    /// Run the periodic sweep: expire stale pools, review blocked pools,
    /// and permanently delete pools blocked too many times. Returns the
    /// addresses removed so callers can release snapshot history.
    pub fn maintain(&self, now_ms: i64) -> Vec<String> {
        let mut removed = Vec::new();
        let mut transitions: Vec<(String, PoolStatus, PoolStatus, String)> = Vec::new();

        {
            let mut entries = self.entries.write();
            let block_review_ms = (self.params.stale_time_ms / BLOCK_REVIEW_DIVISOR) as i64;

            entries.retain(|address, entry| {
                // Permanent removal for repeat offenders.
                if entry.status == PoolStatus::Blocked
                    && entry.block_count >= self.params.max_block_count
                {
                    warn!(
                        pool = %address,
                        block_count = entry.block_count,
                        "pool permanently removed from universe"
                    );
                    removed.push(address.clone());
                    return false;
                }
                true
            });

            for (address, entry) in entries.iter_mut() {
                match entry.status {
                    // Blocked pools get another chance after the review window.
                    PoolStatus::Blocked => {
                        let since = entry.blocked_at_ms.unwrap_or(now_ms);
                        if now_ms - since >= block_review_ms {
                            transitions.push((
                                address.clone(),
                                PoolStatus::Blocked,
                                PoolStatus::Probation,
                                "block review window elapsed".to_string(),
                            ));
                            entry.status = PoolStatus::Probation;
                            entry.blocked_at_ms = None;
                        }
                    }
                    // Anything else expires when inactive too long.
                    PoolStatus::Expired => {}
                    _ => {
                        if now_ms - entry.last_activity_ms >= self.params.stale_time_ms as i64 {
                            transitions.push((
                                address.clone(),
                                entry.status,
                                PoolStatus::Expired,
                                "inactive past stale window".to_string(),
                            ));
                            entry.status = PoolStatus::Expired;
                        }
                    }
                }
            }
        }

        for (address, from, to, reason) in transitions {
            self.push_event(&address, from, to, now_ms, reason);
        }
        removed
    }

    /// Remove a pool unconditionally (operator action).
    pub fn remove(&self, address: &str) -> bool {
        self.entries.write().remove(address).is_some()
    }

    // -------------------------------------------------------------------------
    // Ranking & queries
    // -------------------------------------------------------------------------

    /// All entries with refreshed priority scores, best first.
    pub fn ranked(&self, now_ms: i64) -> Vec<UniverseEntry> {
        let mut entries: Vec<UniverseEntry> = {
            let mut map = self.entries.write();
            for entry in map.values_mut() {
                entry.priority_score = priority(entry, now_ms);
            }
            map.values().cloned().collect()
        };
        entries.sort_by(|a, b| {
            b.priority_score
                .partial_cmp(&a.priority_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entries
    }

    pub fn get(&self, address: &str) -> Option<UniverseEntry> {
        self.entries.read().get(address).cloned()
    }

    pub fn status(&self, address: &str) -> Option<PoolStatus> {
        self.entries.read().get(address).map(|e| e.status)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Ordered transition history (oldest first).
    pub fn events(&self) -> Vec<UniverseEvent> {
        self.events.read().clone()
    }

    fn push_event(&self, pool: &str, from: PoolStatus, to: PoolStatus, at_ms: i64, reason: String) {
        info!(pool, %from, %to, %reason, "universe transition");
        let mut events = self.events.write();
        events.push(UniverseEvent {
            pool: pool.to_string(),
            from,
            to,
            at_ms,
            reason,
        });
        if events.len() > MAX_EVENTS {
            events.remove(0);
        }
    }
}

/// Priority formula: decayed recency, discovery quality, and realised
/// performance, scaled by the status multiplier.
fn priority(entry: &UniverseEntry, now_ms: i64) -> f64 {
    let hours_since_activity = (now_ms - entry.last_activity_ms).max(0) as f64 / 3_600_000.0;
    let recency = (-hours_since_activity / 24.0).exp();
    let discovery = (entry.discovery_score / 100.0).min(1.0);

    let raw = entry.normalized_sharpe * 0.5 + discovery * 0.3 + recency * 0.2;
    raw * entry.status.multiplier()
}

impl std::fmt::Debug for AdaptivePoolUniverse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptivePoolUniverse")
            .field("pools", &self.len())
            .finish()
    }
}
