// =============================================================================
// Reconciliation Engine — compare internal state against the venue
// =============================================================================
//
// SAFETY POLICY: this module logs warnings for any drift it discovers but
// will **never** automatically close positions on the venue. Partial
// failures from best-effort venue calls heal naturally: the next cycle
// re-attempts a pending close, and drift that persists is surfaced through
// the status API for an operator to resolve.
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::position_engine::log_handle_drift;
use crate::types::AccountMode;
use crate::venue::VenueClient;

/// Seconds between reconciliation passes.
const RECONCILE_INTERVAL_SECS: u64 = 60;

/// Summary of a single reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResult {
    /// Internal positions whose handle was found on the venue.
    pub positions_matched: u32,
    /// Internal positions whose handle is missing on the venue.
    pub missing_on_venue: u32,
    /// Venue positions the book does not know about.
    pub orphaned_on_venue: u32,
    /// ISO-8601 timestamp of this reconciliation run.
    pub timestamp: String,
}

/// Run one reconciliation pass: fetch venue handles and compare them
/// against the position book.
pub async fn reconcile_once(
    client: &VenueClient,
    state: &Arc<AppState>,
) -> Result<ReconcileResult> {
    let now = Utc::now().to_rfc3339();
    debug!(timestamp = %now, "reconciliation cycle started");

    let venue_handles = client.open_handles().await?;
    let book_handles = state.position_book.open_handles();

    let (missing_on_venue, orphaned_on_venue) = log_handle_drift(&book_handles, &venue_handles);
    let positions_matched = book_handles.len() as u32 - missing_on_venue;

    let result = ReconcileResult {
        positions_matched,
        missing_on_venue,
        orphaned_on_venue,
        timestamp: now,
    };

    if missing_on_venue > 0 || orphaned_on_venue > 0 {
        warn!(
            matched = positions_matched,
            missing = missing_on_venue,
            orphaned = orphaned_on_venue,
            "reconciliation found drift; leaving resolution to the operator"
        );
    } else {
        debug!(matched = positions_matched, "reconciliation clean");
    }

    Ok(result)
}

/// Background reconciliation loop. Paper mode never calls the venue — the
/// simulated book is trivially consistent.
pub async fn run_reconcile_loop(state: Arc<AppState>, client: Arc<VenueClient>) {
    info!(
        interval_secs = RECONCILE_INTERVAL_SECS,
        "reconciliation loop started"
    );
    let mut ticker = interval(Duration::from_secs(RECONCILE_INTERVAL_SECS));

    loop {
        ticker.tick().await;

        if state.runtime_config.read().account_mode == AccountMode::Paper {
            continue;
        }

        match reconcile_once(&client, &state).await {
            Ok(result) => {
                *state.last_reconcile_ok.write() = Some(std::time::Instant::now());
                if result.missing_on_venue == 0 && result.orphaned_on_venue == 0 {
                    *state.last_reconcile_error.write() = None;
                } else {
                    *state.last_reconcile_error.write() = Some(format!(
                        "drift: {} missing on venue, {} orphaned",
                        result.missing_on_venue, result.orphaned_on_venue
                    ));
                }
                state.increment_version();
            }
            Err(e) => {
                *state.last_reconcile_error.write() = Some(format!("{e}"));
                warn!(error = %e, "reconciliation failed");
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_serialises() {
        let r = ReconcileResult {
            positions_matched: 2,
            missing_on_venue: 1,
            orphaned_on_venue: 0,
            timestamp: "2025-01-01T00:00:00Z".to_string(),
        };
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"positions_matched\":2"));
    }
}
