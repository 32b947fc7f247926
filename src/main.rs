// =============================================================================
// Meridian Bin Nexus — Main Entry Point
// =============================================================================
//
// The engine defaults to Paper + Paused for safety. Operators opt into
// live capital via MERIDIAN_PAPER=0 and into active trading by setting
// `trading_mode` in the runtime config file.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod cycle;
mod decision_envelope;
mod execution;
mod gate;
mod harmonic;
mod kill_switch;
mod microstructure;
mod persistence;
mod position_engine;
mod reconcile;
mod regime;
mod risk;
mod runtime_config;
mod scoring;
mod telemetry;
mod types;
mod universe;
mod venue;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::cycle::CycleEngine;
use crate::execution::ExecutionEngine;
use crate::runtime_config::RuntimeConfig;
use crate::types::AccountMode;
use crate::venue::VenueClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Meridian Bin Nexus — Starting Up                 ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load("runtime_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    // SAFETY: account mode defaults to Paper unless MERIDIAN_PAPER opts
    // into live capital. Trading mode comes from the config file, whose
    // default is Paused.
    if std::env::var("MERIDIAN_PAPER").is_err() {
        config.account_mode = AccountMode::Paper;
    }

    let env_label = std::env::var("MERIDIAN_ENV").unwrap_or_else(|_| "dev".to_string());
    info!(
        environment = %env_label,
        trading_mode = %config.trading_mode,
        account_mode = %config.account_mode,
        capital = config.effective_capital(),
        "Engine starting"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let journal_path = std::env::var("MERIDIAN_JOURNAL_PATH")
        .unwrap_or_else(|_| "meridian_journal.jsonl".to_string());
    let state = Arc::new(AppState::new(config, journal_path));

    // ── 3. Warm up Sharpe memory from the journal ────────────────────────
    match state.journal.read_trade_outcomes() {
        Ok(outcomes) => state.sharpe_memory.warm_up(&outcomes),
        Err(e) => warn!(error = %e, "journal replay failed; starting cold"),
    }

    // ── 4. Build the venue client ────────────────────────────────────────
    let base_url = std::env::var("MERIDIAN_RPC_URL")
        .unwrap_or_else(|_| "https://api.meridian-venue.example".to_string());
    let api_key = std::env::var("MERIDIAN_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("MERIDIAN_API_SECRET").unwrap_or_default();
    let io_timeout_ms = state.runtime_config.read().io_timeout_ms;
    let venue_client = Arc::new(VenueClient::new(base_url, api_key, api_secret, io_timeout_ms));

    // ── 5. Execution engine ──────────────────────────────────────────────
    let exec_engine = Arc::new(ExecutionEngine::new(
        venue_client.clone(),
        state.position_book.clone(),
        state.ledger.clone(),
        state.harmonic.clone(),
        state.commit_lock.clone(),
    ));

    // ── 6. Telemetry loop (discovery + snapshot polling) ─────────────────
    tokio::spawn(telemetry::refresh::run_telemetry_loop(
        state.clone(),
        venue_client.clone(),
    ));

    // ── 7. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr =
        std::env::var("MERIDIAN_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let bind_addr_clone = bind_addr.clone();

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr_clone, "API server listening");
        axum::serve(listener, app)
            .await
            .expect("API server failed");
    });

    // ── 8. Decision cycle loop ───────────────────────────────────────────
    let cycle_state = state.clone();
    let cycle_exec = exec_engine.clone();
    tokio::spawn(async move {
        // Give telemetry a head start so the first cycle has history.
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
        info!("Decision cycle loop starting");

        let loop_interval_ms = cycle_state.runtime_config.read().loop_interval_ms;
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_millis(loop_interval_ms));
        loop {
            interval.tick().await;

            let budget_ms = cycle_state.runtime_config.read().cycle_budget_ms;
            let started = std::time::Instant::now();
            let run = CycleEngine::run_cycle(&cycle_state, &cycle_exec);
            match tokio::time::timeout(
                tokio::time::Duration::from_millis(budget_ms),
                run,
            )
            .await
            {
                Ok(()) => {
                    let elapsed = started.elapsed().as_millis();
                    tracing::debug!(elapsed_ms = elapsed as u64, "decision cycle complete");
                }
                Err(_) => {
                    // Budget exceeded: residual steps are deferred to the
                    // next cycle, never forced.
                    warn!(budget_ms, "decision cycle exceeded its budget; deferred");
                    cycle_state.push_error_with_code(
                        "decision cycle exceeded budget".to_string(),
                        Some("CYCLE_BUDGET".to_string()),
                    );
                }
            }
        }
    });

    // ── 9. Harmonic safety monitor ───────────────────────────────────────
    tokio::spawn(harmonic::monitor::run_harmonic_monitor(
        state.clone(),
        exec_engine.clone(),
    ));

    // ── 10. Reconciliation loop ──────────────────────────────────────────
    tokio::spawn(reconcile::run_reconcile_loop(
        state.clone(),
        venue_client.clone(),
    ));

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 11. Graceful shutdown ────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    if let Err(e) = state.runtime_config.read().save("runtime_config.json") {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Meridian Bin Nexus shut down complete.");
    Ok(())
}
