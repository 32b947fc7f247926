// =============================================================================
// Telemetry Refresh Loop — pool discovery and snapshot polling
// =============================================================================
//
// Two cadences share one task:
//
//   - Snapshots: every TELEMETRY_REFRESH_MS (default 10 s) the loop fetches
//     fresh microstructure snapshots for every live universe pool. Fetches
//     run concurrently (stateless I/O); appends into the snapshot store are
//     then applied sequentially from this single task.
//
//   - Discovery: every LISTING_EVERY_TICKS ticks the loop refreshes the
//     pool listing, updates descriptors, and ingests new pools into the
//     universe in DISCOVERY with their bootstrap score as the discovery
//     score.
//
// A failed fetch skips that pool for the tick; the kill switch notices
// sustained gaps through its missing-snapshot fraction.
// =============================================================================

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::app_state::{now_ms, AppState};
use crate::universe::PoolStatus;
use crate::venue::VenueClient;

/// Listing refresh period, in snapshot ticks (30 ticks x 10 s = 5 min).
const LISTING_EVERY_TICKS: u64 = 30;

/// Run the telemetry loop forever. Spawn once at startup.
pub async fn run_telemetry_loop(state: Arc<AppState>, client: Arc<VenueClient>) {
    let refresh_ms = state.runtime_config.read().telemetry_refresh_ms;
    info!(refresh_ms, "telemetry loop started");

    let mut ticker = interval(Duration::from_millis(refresh_ms));
    let mut tick: u64 = 0;

    loop {
        ticker.tick().await;

        if tick % LISTING_EVERY_TICKS == 0 {
            refresh_listing(&state, &client).await;
        }
        refresh_snapshots(&state, &client).await;

        tick = tick.wrapping_add(1);
    }
}

/// Refresh the pool listing: update descriptors and ingest new pools.
async fn refresh_listing(state: &Arc<AppState>, client: &Arc<VenueClient>) {
    let descriptors = match client.list_pools().await {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "pool listing refresh failed");
            state.push_error_with_code(
                format!("pool listing failed: {e}"),
                Some("TELEMETRY".to_string()),
            );
            return;
        }
    };

    let now = now_ms();
    let mut ingested = 0usize;
    for descriptor in descriptors {
        let discovery_score = state.bootstrap_scorer.score(&descriptor).score;

        let is_new = state.universe.get(&descriptor.address).is_none();
        state.universe.ingest(
            &descriptor.address,
            &descriptor.name,
            discovery_score,
            "listing",
            now,
        );
        if is_new {
            ingested += 1;
        }

        state
            .descriptors
            .write()
            .insert(descriptor.address.clone(), descriptor);
    }

    if ingested > 0 {
        info!(ingested, universe = state.universe.len(), "new pools discovered");
    }
    state.increment_version();
}

/// Fetch fresh snapshots for every pool worth watching.
async fn refresh_snapshots(state: &Arc<AppState>, client: &Arc<VenueClient>) {
    // Live universe pools plus anything we hold a position in.
    let mut pools: Vec<String> = state
        .universe
        .ranked(now_ms())
        .into_iter()
        .filter(|e| !matches!(e.status, PoolStatus::Blocked | PoolStatus::Expired))
        .map(|e| e.address)
        .collect();
    for position in state.position_book.get_open_positions() {
        if !pools.contains(&position.pool_address) {
            pools.push(position.pool_address.clone());
        }
    }
    if pools.is_empty() {
        return;
    }

    // Concurrent fetch; sequential ingest.
    let fetches = pools.iter().map(|pool| {
        let client = client.clone();
        let pool = pool.clone();
        async move {
            let result = client.pool_snapshot(&pool).await;
            (pool, result)
        }
    });
    let results = join_all(fetches).await;

    let now = now_ms();
    let mut appended = 0usize;
    for (pool, result) in results {
        match result {
            Ok(snapshot) => {
                match state.snapshot_store.append(&pool, snapshot) {
                    Ok(()) => {
                        appended += 1;
                        state.universe.touch(&pool, now);
                    }
                    Err(e) => {
                        // Out-of-order or corrupt snapshots are discarded;
                        // the store counts the streak for the kill switch.
                        debug!(pool = %pool, "snapshot discarded: {e}");
                    }
                }
            }
            Err(e) => {
                debug!(pool = %pool, error = %e, "snapshot fetch failed; pool skipped this tick");
            }
        }
    }

    debug!(
        fetched = pools.len(),
        appended, "snapshot refresh complete"
    );
}
