// =============================================================================
// Snapshot Store — per-pool bounded ring of microstructure snapshots
// =============================================================================
//
// The single source of truth that all scoring reads. Each pool owns an
// independent ring of at most `history_length` snapshots, evicted oldest
// first. Rings are created lazily on first append and destroyed when the
// pool leaves the universe.
//
// Validation at ingest:
//   - `fetched_at` must be strictly increasing per pool; violations are
//     rejected and counted (sustained violations mark telemetry unreliable).
//   - Negative liquidity marks the snapshot corrupt and it is discarded.
//
// Thread-safety: all state behind `parking_lot::RwLock`.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Liquidity and swap activity in a single price bin.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BinLevel {
    pub liquidity: f64,
    pub swap_count: u32,
}

/// One immutable microstructure observation of a pool.
///
/// Absence of a bin id in `bins` means zero liquidity at that bin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Unix timestamp in milliseconds at which the snapshot was taken.
    pub fetched_at: i64,
    /// The bin currently receiving trades.
    pub active_bin: i32,
    /// Total liquidity in native units.
    pub total_liquidity: f64,
    /// Total liquidity in USD.
    pub liquidity_usd: f64,
    /// Swaps-per-second proxy reported by the venue.
    pub velocity: f64,
    /// Per-bin liquidity distribution around the active bin.
    pub bins: HashMap<i32, BinLevel>,
}

/// Why an append was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendError {
    /// `fetched_at` did not advance past the previous snapshot.
    Monotonicity {
        pool: String,
        prev_fetched_at: i64,
        next_fetched_at: i64,
    },
    /// The snapshot failed a sanity check (e.g. negative liquidity).
    Corrupt { pool: String, reason: String },
}

impl std::fmt::Display for AppendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Monotonicity {
                pool,
                prev_fetched_at,
                next_fetched_at,
            } => write!(
                f,
                "monotonicity violation for {pool}: {next_fetched_at} <= {prev_fetched_at}"
            ),
            Self::Corrupt { pool, reason } => {
                write!(f, "corrupt snapshot for {pool}: {reason}")
            }
        }
    }
}

impl std::error::Error for AppendError {}

// ---------------------------------------------------------------------------
// SnapshotStore -- thread-safe ring buffer per pool
// ---------------------------------------------------------------------------

/// Thread-safe store holding the most recent snapshots per pool address.
pub struct SnapshotStore {
    buffers: RwLock<HashMap<String, VecDeque<PoolSnapshot>>>,
    /// Per-pool count of rejected out-of-order snapshots since the last
    /// successful append.
    violations: RwLock<HashMap<String, u32>>,
    history_length: usize,
}

impl SnapshotStore {
    /// Create a new store retaining at most `history_length` snapshots per
    /// pool.
    pub fn new(history_length: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            violations: RwLock::new(HashMap::new()),
            history_length,
        }
    }

    // -------------------------------------------------------------------------
    // Ingest
    // -------------------------------------------------------------------------

    /// Append a snapshot to a pool's ring, creating the ring lazily.
    ///
    /// Rejects snapshots whose `fetched_at` does not strictly advance and
    /// snapshots with negative liquidity. Rejection is local to the pool;
    /// the caller skips the pool for the cycle rather than aborting.
    pub fn append(&self, pool: &str, snapshot: PoolSnapshot) -> Result<(), AppendError> {
        if snapshot.liquidity_usd < 0.0 || snapshot.total_liquidity < 0.0 {
            warn!(
                pool,
                liquidity_usd = snapshot.liquidity_usd,
                "rejecting corrupt snapshot (negative liquidity)"
            );
            return Err(AppendError::Corrupt {
                pool: pool.to_string(),
                reason: format!("negative liquidity ({})", snapshot.liquidity_usd),
            });
        }

        let mut map = self.buffers.write();
        let ring = map
            .entry(pool.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.history_length + 1));

        if let Some(last) = ring.back() {
            if snapshot.fetched_at <= last.fetched_at {
                let err = AppendError::Monotonicity {
                    pool: pool.to_string(),
                    prev_fetched_at: last.fetched_at,
                    next_fetched_at: snapshot.fetched_at,
                };
                drop(map);
                let mut violations = self.violations.write();
                let count = violations.entry(pool.to_string()).or_insert(0);
                *count += 1;
                warn!(pool, violations = *count, "snapshot discarded: {}", err);
                return Err(err);
            }
        }

        ring.push_back(snapshot);
        while ring.len() > self.history_length {
            ring.pop_front();
        }
        drop(map);

        // A clean append clears the violation streak.
        self.violations.write().remove(pool);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Return the last `n` snapshots (oldest-first), or fewer if the ring is
    /// shorter.
    pub fn window(&self, pool: &str, n: usize) -> Vec<PoolSnapshot> {
        let map = self.buffers.read();
        match map.get(pool) {
            Some(ring) => {
                let start = ring.len().saturating_sub(n);
                ring.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Return the full retained history for a pool (oldest-first).
    pub fn history(&self, pool: &str) -> Vec<PoolSnapshot> {
        let map = self.buffers.read();
        map.get(pool)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Return the most recent snapshot for a pool, if any.
    pub fn latest(&self, pool: &str) -> Option<PoolSnapshot> {
        let map = self.buffers.read();
        map.get(pool).and_then(|ring| ring.back().cloned())
    }

    /// Number of snapshots currently retained for a pool.
    pub fn len(&self, pool: &str) -> usize {
        let map = self.buffers.read();
        map.get(pool).map_or(0, VecDeque::len)
    }

    /// All pool addresses with at least one retained snapshot.
    pub fn tracked_pools(&self) -> Vec<String> {
        self.buffers.read().keys().cloned().collect()
    }

    /// Consecutive monotonicity violations since the pool's last clean
    /// append. Feeds the kill switch's telemetry-unreliability check.
    pub fn violation_streak(&self, pool: &str) -> u32 {
        self.violations.read().get(pool).copied().unwrap_or(0)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Release all storage for a pool (called when it leaves the universe).
    pub fn drop_pool(&self, pool: &str) {
        let removed = self.buffers.write().remove(pool).is_some();
        self.violations.write().remove(pool);
        if removed {
            debug!(pool, "snapshot history released");
        }
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pools = self.buffers.read().len();
        f.debug_struct("SnapshotStore")
            .field("pools", &pools)
            .field("history_length", &self.history_length)
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn snap(fetched_at: i64, active_bin: i32, liquidity_usd: f64) -> PoolSnapshot {
        PoolSnapshot {
            fetched_at,
            active_bin,
            total_liquidity: liquidity_usd,
            liquidity_usd,
            velocity: 0.2,
            bins: HashMap::new(),
        }
    }

    #[test]
    fn append_and_window() {
        let store = SnapshotStore::new(20);
        for i in 0..5 {
            store.append("pool-a", snap(1_000 * (i + 1), i as i32, 100.0)).unwrap();
        }
        assert_eq!(store.len("pool-a"), 5);

        let last_three = store.window("pool-a", 3);
        assert_eq!(last_three.len(), 3);
        assert_eq!(last_three[0].fetched_at, 3_000);
        assert_eq!(last_three[2].fetched_at, 5_000);

        // Requesting more than retained returns everything.
        assert_eq!(store.window("pool-a", 50).len(), 5);
    }

    #[test]
    fn ring_evicts_oldest_beyond_history_length() {
        let store = SnapshotStore::new(3);
        for i in 0..6 {
            store.append("p", snap(1_000 * (i + 1), 0, 1.0)).unwrap();
        }
        let history = store.history("p");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].fetched_at, 4_000);
        assert_eq!(history[2].fetched_at, 6_000);
    }

    #[test]
    fn monotonicity_violation_rejected_and_counted() {
        let store = SnapshotStore::new(20);
        store.append("p", snap(2_000, 0, 1.0)).unwrap();

        let err = store.append("p", snap(2_000, 0, 1.0)).unwrap_err();
        assert!(matches!(err, AppendError::Monotonicity { .. }));
        assert_eq!(store.violation_streak("p"), 1);

        let err = store.append("p", snap(1_500, 0, 1.0)).unwrap_err();
        assert!(matches!(err, AppendError::Monotonicity { .. }));
        assert_eq!(store.violation_streak("p"), 2);

        // History is untouched by rejected appends.
        assert_eq!(store.len("p"), 1);

        // A clean append resets the streak.
        store.append("p", snap(3_000, 0, 1.0)).unwrap();
        assert_eq!(store.violation_streak("p"), 0);
        assert_eq!(store.len("p"), 2);
    }

    #[test]
    fn negative_liquidity_rejected_as_corrupt() {
        let store = SnapshotStore::new(20);
        let err = store.append("p", snap(1_000, 0, -5.0)).unwrap_err();
        assert!(matches!(err, AppendError::Corrupt { .. }));
        assert_eq!(store.len("p"), 0);
    }

    #[test]
    fn history_timestamps_strictly_increasing() {
        let store = SnapshotStore::new(20);
        for t in [100, 200, 250, 900, 901] {
            store.append("p", snap(t, 0, 1.0)).unwrap();
        }
        let history = store.history("p");
        for pair in history.windows(2) {
            assert!(
                pair[1].fetched_at > pair[0].fetched_at,
                "history must be strictly increasing"
            );
            assert!(pair[1].liquidity_usd >= 0.0);
        }
    }

    #[test]
    fn drop_pool_releases_storage() {
        let store = SnapshotStore::new(20);
        store.append("p", snap(1_000, 0, 1.0)).unwrap();
        assert_eq!(store.tracked_pools(), vec!["p".to_string()]);

        store.drop_pool("p");
        assert_eq!(store.len("p"), 0);
        assert!(store.tracked_pools().is_empty());
        assert!(store.latest("p").is_none());
    }

    #[test]
    fn pools_are_independent() {
        let store = SnapshotStore::new(20);
        store.append("a", snap(5_000, 0, 1.0)).unwrap();
        // A pool with an older timestamp than another pool is fine.
        store.append("b", snap(1_000, 0, 1.0)).unwrap();
        assert_eq!(store.len("a"), 1);
        assert_eq!(store.len("b"), 1);
    }
}
