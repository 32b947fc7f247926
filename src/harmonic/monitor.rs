// =============================================================================
// Harmonic Monitor Loop — fast safety tick between decision cycles
// =============================================================================
//
// The decision cycle runs every LOOP_INTERVAL_MS (default 2 minutes), but a
// pool can die faster than that. This background task wakes every 30
// seconds, re-evaluates the harmonic stop for every open position from the
// freshest snapshots, and closes any position whose controller returns
// FULL_EXIT.
//
// Designed to be spawned once at engine startup:
//
//   tokio::spawn(run_harmonic_monitor(state.clone(), exec.clone()));
//
// =============================================================================

use std::sync::Arc;

use tokio::time::{interval, Duration};
use tracing::{debug, info};

use crate::app_state::{now_ms, AppState};
use crate::cycle::CycleEngine;
use crate::execution::ExecutionEngine;
use crate::harmonic::{MicroObservation, StopAction};
use crate::microstructure::{MicrostructureMetrics, MomentumSlopes};
use crate::types::AccountMode;

/// Interval at which the monitor evaluates open positions.
const MONITOR_INTERVAL_SECS: u64 = 30;

/// Run the harmonic monitor loop. This function runs forever and should be
/// spawned as a background Tokio task.
pub async fn run_harmonic_monitor(state: Arc<AppState>, exec: Arc<ExecutionEngine>) {
    info!(
        interval_secs = MONITOR_INTERVAL_SECS,
        "harmonic monitor started"
    );

    let mut ticker = interval(Duration::from_secs(MONITOR_INTERVAL_SECS));

    loop {
        ticker.tick().await;
        let now = now_ms();

        let open = state.position_book.get_open_positions();
        if open.is_empty() {
            debug!("harmonic monitor: no open positions");
            continue;
        }

        let (min_snapshots, paper) = {
            let config = state.runtime_config.read();
            (
                config.min_snapshots,
                config.account_mode == AccountMode::Paper,
            )
        };

        debug!(count = open.len(), "harmonic monitor: evaluating positions");

        // Collect exits first; closing mutates the book and the ledger.
        let mut to_close: Vec<(String, f64)> = Vec::new();

        for position in &open {
            let history = state.snapshot_store.history(&position.pool_address);
            let Some(latest) = history.last() else {
                continue;
            };
            let fee_rate = state
                .descriptors
                .read()
                .get(&position.pool_address)
                .map(|d| d.base_fee_rate)
                .unwrap_or(0.0);

            let Some(metrics) = MicrostructureMetrics::compute(&history, fee_rate, min_snapshots)
            else {
                // History too short to judge; the decision cycle's
                // kill-switch telemetry check covers sustained gaps.
                continue;
            };
            let slopes = MomentumSlopes::compute(&history, min_snapshots);
            let observation = MicroObservation::from_metrics(&metrics, latest.liquidity_usd);

            match state
                .harmonic
                .evaluate(&position.trade_id, &observation, &slopes, now)
            {
                Ok(decision) if decision.action == StopAction::FullExit => {
                    let exit_score = state
                        .last_scores
                        .read()
                        .get(&position.pool_address)
                        .copied()
                        .unwrap_or(0.0);
                    to_close.push((position.trade_id.clone(), exit_score));
                }
                Ok(decision) => {
                    debug!(
                        trade_id = %position.trade_id,
                        health = format!("{:.3}", decision.health_score),
                        bad_samples = decision.consecutive_bad_samples,
                        in_grace = decision.in_grace,
                        "harmonic monitor: hold"
                    );
                }
                Err(e) => {
                    state.push_error_with_code(
                        format!("harmonic monitor evaluation failed: {e}"),
                        Some("INVARIANT".to_string()),
                    );
                }
            }
        }

        for (trade_id, exit_score) in to_close {
            CycleEngine::close_and_record(
                &state,
                &exec,
                &trade_id,
                "HARMONIC_FULL_EXIT",
                exit_score,
                paper,
            )
            .await;
        }
    }
}
