// =============================================================================
// Decision Cycle — The Brain of Meridian
// =============================================================================
//
// Runs once per LOOP_INTERVAL_MS. Within a cycle the pipeline runs to
// completion; all mutations of shared state happen from this single task:
//
//   1. Universe maintenance (expiry, block review, permanent removal)
//   2. Score every tracked pool (metrics -> slopes -> time-weight -> tier4)
//   3. Aggregate market-wide signals -> regime governor -> playbook params
//   4. Kill switch evaluation (force-exit-all on trigger)
//   5. Playbook force-exit (CHAOS) — overrides any harmonic freeze
//   6. Harmonic stop evaluation for surviving open positions
//   7. Take-profit management (TP1 fee claim, TP2 extended target)
//   8. Entry pipeline: gate -> rank -> risk bucket batch -> deploy
//   9. Ledger/view consistency check
//
// Per-pool failures are local: a pool that cannot be scored is skipped for
// the cycle, never blocking the rest of the pipeline.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app_state::{now_ms, AppState};
use crate::decision_envelope::DecisionEnvelope;
use crate::execution::{DeployProposal, ExecutionEngine, ExecutionResult};
use crate::gate::EntryGate;
use crate::harmonic::{HarmonicBaseline, MicroObservation, StopAction};
use crate::kill_switch::PoolCycleObservation;
use crate::microstructure::{MicrostructureMetrics, MomentumSlopes, TimeWeightResult};
use crate::persistence::JournalRecord;
use crate::position_engine::BinRange;
use crate::regime::{MacroRegime, MacroSignals};
use crate::risk::bucket::SizingCandidate;
use crate::scoring::Tier4Score;
use crate::types::{AccountMode, TradingMode};
use crate::universe::TradeOutcome;

/// Composite-score drop (points) that counts as a health collapse for the
/// kill switch.
const COLLAPSE_SCORE_DROP: f64 = 15.0;

/// Fraction of committed size assumed at risk between two cycles; the
/// denominator of recorded R-multiples.
const RISK_FRACTION: f64 = 0.10;

/// Cycles a position must survive before TP1 arms.
const TP1_MIN_CYCLES: u32 = 3;

/// One pool's full evaluation for this cycle.
struct PoolEvaluation {
    score: Tier4Score,
    metrics: Option<MicrostructureMetrics>,
    time_weight: TimeWeightResult,
    latest_liquidity_usd: f64,
    latest_active_bin: Option<i32>,
}

pub struct CycleEngine;

impl CycleEngine {
    /// Run one full decision cycle.
    pub async fn run_cycle(state: &Arc<AppState>, exec: &Arc<ExecutionEngine>) {
        let now = now_ms();
        let config = state.runtime_config.read().clone();
        let paper = config.account_mode == AccountMode::Paper;

        // ── 1. Universe maintenance ─────────────────────────────────────
        for removed in state.universe.maintain(now) {
            state.snapshot_store.drop_pool(&removed);
            state.time_weight.drop_pool(&removed);
            state.scorer.drop_pool(&removed);
        }

        // ── 2. Score every tracked pool ─────────────────────────────────
        let pools: Vec<String> = state
            .universe
            .ranked(now)
            .into_iter()
            .map(|e| e.address)
            .collect();

        let mut evaluations: HashMap<String, PoolEvaluation> = HashMap::new();
        for pool in &pools {
            let eval = Self::evaluate_pool(state, pool, now, config.min_snapshots);
            evaluations.insert(pool.clone(), eval);
        }

        // ── 3. Regime ───────────────────────────────────────────────────
        let signals = Self::aggregate_signals(state, &evaluations);
        let previous_regime = state.governor.current();
        let regime = state.governor.observe(&signals, now);
        let params = regime.params();

        if regime != previous_regime {
            let _ = state.journal.append(&JournalRecord::RegimeTransition(
                state
                    .governor
                    .transitions()
                    .last()
                    .cloned()
                    .expect("a committed switch always records a transition"),
            ));
            // Leaving CHAOS arms the post-chaos entry cooldown.
            if previous_regime == MacroRegime::Chaos {
                let cooldown = previous_regime.params().post_chaos_cooldown_ms;
                *state.entry_cooldown_until_ms.write() = now + cooldown as i64;
                info!(cooldown_ms = cooldown, "post-chaos entry cooldown armed");
            }
        }

        // ── 4. Kill switch ──────────────────────────────────────────────
        let observations = Self::build_kill_observations(state, &evaluations, now, &config);
        if let Some(reason) = state.kill_switch.evaluate(&observations, now) {
            let _ = state.journal.append(&JournalRecord::Kill {
                reason: reason.to_string(),
                at_ms: now,
            });
            Self::force_exit_all(state, exec, &evaluations, "KILL_SWITCH", paper).await;
            Self::finish_cycle(state, &evaluations, now);
            return;
        }

        // ── 5. Playbook force-exit ──────────────────────────────────────
        if params.force_exit_all {
            Self::force_exit_all(state, exec, &evaluations, "REGIME_CHAOS", paper).await;
            Self::finish_cycle(state, &evaluations, now);
            return;
        }

        // ── 6 & 7. Manage open positions ────────────────────────────────
        Self::manage_open_positions(state, exec, &evaluations, &params, paper, now).await;

        // ── 8. Entry pipeline ───────────────────────────────────────────
        let entries_allowed = config.trading_mode == TradingMode::Live
            && !params.block_entries
            && !state.kill_switch.in_cooldown(now)
            && now >= *state.entry_cooldown_until_ms.read();

        if entries_allowed {
            Self::run_entry_pipeline(state, exec, &evaluations, &params, paper, now).await;
        } else {
            debug!(
                trading_mode = %config.trading_mode,
                regime = %regime,
                kill_cooldown = state.kill_switch.in_cooldown(now),
                "entries disabled this cycle"
            );
        }

        // ── 9. Consistency check & bookkeeping ──────────────────────────
        Self::finish_cycle(state, &evaluations, now);
    }

    // -------------------------------------------------------------------------
    // Pool evaluation
    // -------------------------------------------------------------------------

    fn evaluate_pool(
        state: &Arc<AppState>,
        pool: &str,
        now: i64,
        min_snapshots: usize,
    ) -> PoolEvaluation {
        let history = state.snapshot_store.history(pool);
        let latest = history.last();
        let latest_liquidity_usd = latest.map(|s| s.liquidity_usd).unwrap_or(0.0);
        let latest_active_bin = latest.map(|s| s.active_bin);

        let fee_rate = state
            .descriptors
            .read()
            .get(pool)
            .map(|d| d.base_fee_rate)
            .unwrap_or(0.0);

        let Some(metrics) = MicrostructureMetrics::compute(&history, fee_rate, min_snapshots)
        else {
            return PoolEvaluation {
                score: Tier4Score::invalid(pool, "insufficient snapshot history"),
                metrics: None,
                time_weight: TimeWeightResult::default(),
                latest_liquidity_usd,
                latest_active_bin,
            };
        };

        let slopes = MomentumSlopes::compute(&history, min_snapshots);

        state
            .time_weight
            .record(pool, now, metrics.raw_bin_velocity, metrics.raw_swap_velocity);
        let time_weight = state.time_weight.compute(pool, now);

        let score = state.scorer.score(pool, &metrics, &slopes, &time_weight);

        if state.runtime_config.read().verbose_scoring {
            debug!(
                pool,
                base = format!("{:.1}", score.base_score),
                tier4 = format!("{:.1}", score.tier4_score),
                regime = %score.regime,
                migration = %score.migration,
                entropy = format!("{:.3}", score.pool_entropy),
                "pool scored"
            );
        }

        PoolEvaluation {
            score,
            metrics: Some(metrics),
            time_weight,
            latest_liquidity_usd,
            latest_active_bin,
        }
    }

    // -------------------------------------------------------------------------
    // Market-wide signal aggregation
    // -------------------------------------------------------------------------

    fn aggregate_signals(
        state: &Arc<AppState>,
        evaluations: &HashMap<String, PoolEvaluation>,
    ) -> MacroSignals {
        let valid: Vec<&PoolEvaluation> =
            evaluations.values().filter(|e| e.score.valid).collect();
        if valid.is_empty() {
            return MacroSignals::default();
        }
        let n = valid.len() as f64;

        let velocity = valid
            .iter()
            .map(|e| (e.score.pillars.bin_velocity + e.score.pillars.swap_velocity) / 2.0)
            .sum::<f64>()
            / n;
        let entropy_level = valid.iter().map(|e| e.score.pool_entropy).sum::<f64>() / n;
        let velocity_slope = valid
            .iter()
            .map(|e| e.score.slopes.velocity_slope)
            .sum::<f64>()
            / n;
        let liquidity_slope = valid
            .iter()
            .map(|e| e.score.slopes.liquidity_slope)
            .sum::<f64>()
            / n;
        let entropy_slope = valid
            .iter()
            .map(|e| e.score.slopes.entropy_slope)
            .sum::<f64>()
            / n;
        let consistency = valid
            .iter()
            .map(|e| e.time_weight.consistency)
            .sum::<f64>()
            / n;
        let fee_intensity = valid
            .iter()
            .map(|e| e.score.pillars.fee_intensity / 100.0)
            .sum::<f64>()
            / n;
        let migration_confidence = valid
            .iter()
            .filter(|e| e.score.migration != crate::scoring::MigrationDirection::Neutral)
            .count() as f64
            / n;

        // Venue drift observed by reconciliation degrades execution quality.
        let execution_quality = if state.last_reconcile_error.read().is_some() {
            0.5
        } else {
            1.0
        };

        MacroSignals {
            velocity_slope,
            liquidity_slope,
            entropy_slope,
            entropy_level,
            velocity,
            migration_confidence,
            consistency,
            fee_intensity,
            execution_quality,
        }
    }

    // -------------------------------------------------------------------------
    // Kill switch inputs
    // -------------------------------------------------------------------------

    fn build_kill_observations(
        state: &Arc<AppState>,
        evaluations: &HashMap<String, PoolEvaluation>,
        now: i64,
        config: &crate::runtime_config::RuntimeConfig,
    ) -> Vec<PoolCycleObservation> {
        let last_scores = state.last_scores.read();
        let stale_after_ms = 3 * config.telemetry_refresh_ms as i64;

        evaluations
            .iter()
            .map(|(pool, eval)| {
                let prev = last_scores.get(pool).copied();
                let health_collapsed = match (prev, eval.score.valid) {
                    (Some(prev), true) => prev - eval.score.tier4_score >= COLLAPSE_SCORE_DROP,
                    // A pool that had a score and lost telemetry entirely
                    // also counts as collapsed.
                    (Some(prev), false) => prev > 0.0,
                    _ => false,
                };

                let window = state.snapshot_store.window(pool, 2);
                let active_bin_jump = if window.len() == 2 {
                    window[1].active_bin - window[0].active_bin
                } else {
                    0
                };
                let liquidity_change_pct = if window.len() == 2 && window[0].liquidity_usd > 0.0 {
                    (window[1].liquidity_usd - window[0].liquidity_usd) / window[0].liquidity_usd
                } else {
                    0.0
                };

                let snapshot_missing = state
                    .snapshot_store
                    .latest(pool)
                    .map(|s| now - s.fetched_at > stale_after_ms)
                    .unwrap_or(true);

                PoolCycleObservation {
                    pool: pool.clone(),
                    health_collapsed,
                    active_bin_jump,
                    liquidity_change_pct,
                    snapshot_missing,
                }
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Exits
    // -------------------------------------------------------------------------

    /// Exit every open position. Used by the kill switch and CHAOS; a
    /// force-exit overrides any harmonic freeze by construction — it never
    /// consults harmonic state.
    async fn force_exit_all(
        state: &Arc<AppState>,
        exec: &Arc<ExecutionEngine>,
        evaluations: &HashMap<String, PoolEvaluation>,
        reason: &str,
        paper: bool,
    ) {
        let open = state.position_book.get_open_positions();
        if open.is_empty() {
            return;
        }
        warn!(count = open.len(), reason, "force-exiting all positions");

        for position in open {
            let exit_score = evaluations
                .get(&position.pool_address)
                .map(|e| e.score.tier4_score)
                .unwrap_or(0.0);
            Self::close_and_record(state, exec, &position.trade_id, reason, exit_score, paper)
                .await;
        }
    }

    /// Close one position and propagate the outcome everywhere it matters:
    /// Sharpe memory, universe, journal, audit trail.
    pub async fn close_and_record(
        state: &Arc<AppState>,
        exec: &Arc<ExecutionEngine>,
        trade_id: &str,
        reason: &str,
        exit_score: f64,
        paper: bool,
    ) {
        let Some(closed) = exec.close_liquidity_position(trade_id, reason, paper).await else {
            state.push_error_with_code(
                format!("close failed for trade {trade_id}"),
                Some("EXECUTION_FAILURE".to_string()),
            );
            return;
        };

        let now = now_ms();
        let outcome = TradeOutcome {
            trade_id: closed.trade_id.clone(),
            pool: closed.pool_address.clone(),
            entry_time_ms: closed.entry_time_ms,
            exit_time_ms: now,
            size_usd: closed.size_usd,
            realized_pnl: closed.realized_pnl,
            slippage_impact: 0.0,
            entry_score: closed.entry_score,
            exit_score,
            risk_amount: closed.size_usd * RISK_FRACTION,
        };

        state.sharpe_memory.record(&outcome);
        if let Err(e) = state
            .journal
            .append(&JournalRecord::TradeOutcome(outcome.clone()))
        {
            state.push_error(format!("journal append failed: {e}"));
        }

        let sharpe = state.sharpe_memory.sharpe(&closed.pool_address, now);
        if let Some(stats) = state.sharpe_memory.stats(&closed.pool_address) {
            state.universe.apply_performance(
                &closed.pool_address,
                sharpe,
                stats.trade_count,
                stats.win_rate,
                stats.total_pnl,
                now,
            );
        }

        state.push_decision(DecisionEnvelope::exit(
            closed.pool_address.clone(),
            exit_score,
            reason,
        ));
        state.increment_version();
    }

    // -------------------------------------------------------------------------
    // Open-position management (harmonic + take profit + playbook exits)
    // -------------------------------------------------------------------------

    async fn manage_open_positions(
        state: &Arc<AppState>,
        exec: &Arc<ExecutionEngine>,
        evaluations: &HashMap<String, PoolEvaluation>,
        params: &crate::regime::RegimeParams,
        paper: bool,
        now: i64,
    ) {
        let open = state.position_book.get_open_positions();

        for position in open {
            let eval = evaluations.get(&position.pool_address);
            let current_score = eval.map(|e| e.score.tier4_score).unwrap_or(0.0);

            state
                .position_book
                .mark_cycle(&position.trade_id, current_score);

            // ── Harmonic stop ───────────────────────────────────────────
            let Some(eval) = eval else {
                continue;
            };
            if let Some(metrics) = &eval.metrics {
                let observation =
                    MicroObservation::from_metrics(metrics, eval.latest_liquidity_usd);
                match state.harmonic.evaluate(
                    &position.trade_id,
                    &observation,
                    &eval.score.slopes,
                    now,
                ) {
                    Ok(decision) if decision.action == StopAction::FullExit => {
                        Self::close_and_record(
                            state,
                            exec,
                            &position.trade_id,
                            "HARMONIC_FULL_EXIT",
                            current_score,
                            paper,
                        )
                        .await;
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        state.push_error_with_code(
                            format!("harmonic evaluation failed: {e}"),
                            Some("INVARIANT".to_string()),
                        );
                        continue;
                    }
                }
            }

            // ── Playbook score exit ─────────────────────────────────────
            // The stricter of the macro playbook and the pool's own regime
            // threshold wins.
            let exit_threshold = params.exit_threshold.max(eval.score.exit_threshold);
            if eval.score.valid && current_score < exit_threshold {
                Self::close_and_record(
                    state,
                    exec,
                    &position.trade_id,
                    "SCORE_EXIT",
                    current_score,
                    paper,
                )
                .await;
                continue;
            }

            // ── Take-profit management ──────────────────────────────────
            if eval.score.valid
                && !position.took_profit_1
                && position.consecutive_cycles >= TP1_MIN_CYCLES
                && current_score >= eval.score.entry_threshold
            {
                if let Some(fees) = exec.claim_position_fees(&position.trade_id, paper).await {
                    debug!(trade_id = %position.trade_id, fees, "TP1 fee claim executed");
                }
            }

            if params.allow_extended_targets
                && position.took_profit_1
                && !position.took_profit_2
                && current_score > position.peak_score
            {
                state.position_book.mark_took_profit_2(&position.trade_id);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Entry pipeline
    // -------------------------------------------------------------------------

    async fn run_entry_pipeline(
        state: &Arc<AppState>,
        exec: &Arc<ExecutionEngine>,
        evaluations: &HashMap<String, PoolEvaluation>,
        params: &crate::regime::RegimeParams,
        paper: bool,
        now: i64,
    ) {
        let ledger_snap = state.ledger.snapshot();
        let open_count = state.position_book.open_count() as u32;

        if open_count >= params.max_concurrent_positions {
            debug!(
                open = open_count,
                max = params.max_concurrent_positions,
                "regime position cap reached"
            );
            return;
        }

        // ── Gate candidates ─────────────────────────────────────────────
        let mut candidates: Vec<SizingCandidate> = Vec::new();
        let mut candidate_meta: HashMap<String, (f64, bool)> = HashMap::new();

        for entry in state.universe.ranked(now) {
            if entry.status.multiplier() <= 0.0 {
                continue;
            }
            if state.position_book.has_open_on_pool(&entry.address) {
                continue;
            }
            let Some(eval) = evaluations.get(&entry.address) else {
                continue;
            };

            if eval.score.valid {
                let verdict = EntryGate::evaluate(&eval.score);
                if !verdict.admitted {
                    let reason = verdict
                        .block_reason
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "UNKNOWN".to_string());
                    state.push_decision(DecisionEnvelope::blocked(
                        entry.address.clone(),
                        eval.score.tier4_score,
                        false,
                        "Gate",
                        reason,
                    ));
                    continue;
                }
                candidates.push(SizingCandidate {
                    pool: entry.address.clone(),
                    score: eval.score.tier4_score,
                    liquidity_slope_per_min: eval.score.slopes.liquidity_slope,
                    pool_tvl_usd: eval.latest_liquidity_usd,
                });
                candidate_meta.insert(entry.address.clone(), (eval.score.tier4_score, false));
            } else {
                // Bootstrap path: no usable telemetry yet, but the coarse
                // descriptor can still admit a young pool. Requires at
                // least one snapshot so we know where the active bin is.
                let Some(descriptor) = state.descriptors.read().get(&entry.address).cloned()
                else {
                    continue;
                };
                if eval.latest_active_bin.is_none() {
                    continue;
                }
                let bootstrap = state.bootstrap_scorer.score(&descriptor);
                if !bootstrap.admissible {
                    state.push_decision(DecisionEnvelope::blocked(
                        entry.address.clone(),
                        bootstrap.score,
                        true,
                        "Gate",
                        "SCORE_LOW",
                    ));
                    continue;
                }
                candidates.push(SizingCandidate {
                    pool: entry.address.clone(),
                    score: bootstrap.score,
                    liquidity_slope_per_min: 0.0,
                    pool_tvl_usd: eval.latest_liquidity_usd.max(descriptor.liquidity_usd),
                });
                candidate_meta.insert(entry.address.clone(), (bootstrap.score, true));
            }
        }

        // Portfolio capacity is consumed by the best candidates first.
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        // ── Risk bucket batch assignment ────────────────────────────────
        let view = crate::risk::PortfolioView {
            total_capital_usd: ledger_snap.total_capital_usd,
            deployed_usd: ledger_snap.deployed_usd,
            total_positions: open_count,
            tier_positions: [
                ledger_snap.per_tier[0].positions,
                ledger_snap.per_tier[1].positions,
                ledger_snap.per_tier[2].positions,
                ledger_snap.per_tier[3].positions,
            ],
        };
        let assignments = state.bucket_engine.batch_assign(&candidates, &view);

        // ── Deploy admitted candidates ──────────────────────────────────
        let mut opened = 0u32;
        for (pool, assignment) in assignments {
            let (score, is_bootstrap) = candidate_meta.get(&pool).copied().unwrap_or((0.0, false));

            let assignment = match assignment {
                Ok(a) => a,
                Err(reject) => {
                    state.push_decision(DecisionEnvelope::blocked(
                        pool,
                        score,
                        is_bootstrap,
                        "Risk",
                        reject.to_string(),
                    ));
                    continue;
                }
            };

            if state.position_book.open_count() as u32 + 1 > params.max_concurrent_positions {
                break;
            }

            // ── Sharpe and playbook sizing multipliers ──────────────────
            let sharpe = state.sharpe_memory.sharpe(&assignment.pool, now);
            let Some(sharpe_multiplier) = state.sharpe_memory.size_multiplier(sharpe) else {
                state.push_decision(DecisionEnvelope::blocked(
                    assignment.pool.clone(),
                    score,
                    is_bootstrap,
                    "Risk",
                    format!("SHARPE_BLOCKED ({sharpe:.2})"),
                ));
                continue;
            };
            let size_usd = assignment.final_size_usd * params.size_multiplier * sharpe_multiplier;
            if size_usd < 10.0 {
                continue;
            }

            // ── Build the deployment ────────────────────────────────────
            let Some(eval) = evaluations.get(&assignment.pool) else {
                continue;
            };
            let Some(active_bin) = eval.latest_active_bin else {
                continue;
            };
            let descriptor = state.descriptors.read().get(&assignment.pool).cloned();
            let bin_step = descriptor.as_ref().map(|d| d.bin_step).unwrap_or(10);

            let baseline = Self::build_baseline(eval, now);
            let proposal = DeployProposal {
                pool: assignment.pool.clone(),
                tier: assignment.tier,
                score,
                entry_price: bin_price(active_bin, bin_step),
                size_usd,
                bin_range: BinRange::centred(active_bin, eval.score.bin_width.width()),
                regime: state.governor.current(),
                migration: eval.score.migration,
                slopes: eval.score.slopes,
                baseline,
            };

            match exec.open_liquidity_position(&proposal, paper, now).await {
                ExecutionResult::Deployed(trade_id) | ExecutionResult::Simulated(trade_id) => {
                    opened += 1;
                    state.universe.touch(&assignment.pool, now);
                    *state.entry_cooldown_until_ms.write() =
                        now + params.entry_cooldown_ms as i64;
                    state.push_decision(DecisionEnvelope::allow(
                        assignment.pool.clone(),
                        score,
                        is_bootstrap,
                    ));
                    debug!(trade_id = %trade_id, pool = %assignment.pool, "deployment complete");
                }
                ExecutionResult::Blocked(reason) => {
                    state.push_decision(DecisionEnvelope::blocked(
                        assignment.pool.clone(),
                        score,
                        is_bootstrap,
                        "Risk",
                        reason,
                    ));
                }
                ExecutionResult::Failed(err) => {
                    state.push_error_with_code(
                        format!("deployment failed for {}: {err}", assignment.pool),
                        Some("EXECUTION_FAILURE".to_string()),
                    );
                }
            }
        }

        if opened > 0 {
            info!(opened, regime = %state.governor.current(), "cycle deployments complete");
        }
    }

    fn build_baseline(eval: &PoolEvaluation, now: i64) -> HarmonicBaseline {
        let observation = match &eval.metrics {
            Some(metrics) => MicroObservation::from_metrics(metrics, eval.latest_liquidity_usd),
            // Bootstrap entry: only a single snapshot exists. Seed the
            // baseline from what the snapshot reports directly.
            None => MicroObservation {
                bin_velocity: 0.0,
                swap_velocity: 0.0,
                entropy: eval.score.pool_entropy,
                fee_intensity: 0.0,
                liquidity_usd: eval.latest_liquidity_usd,
            },
        };
        HarmonicBaseline {
            observation,
            captured_at_ms: now,
        }
    }

    // -------------------------------------------------------------------------
    // Cycle close-out
    // -------------------------------------------------------------------------

    fn finish_cycle(
        state: &Arc<AppState>,
        evaluations: &HashMap<String, PoolEvaluation>,
        now: i64,
    ) {
        // Refresh per-pool performance standing in the universe.
        for pool in evaluations.keys() {
            if let Some(stats) = state.sharpe_memory.stats(pool) {
                let sharpe = state.sharpe_memory.sharpe(pool, now);
                state.universe.apply_performance(
                    pool,
                    sharpe,
                    stats.trade_count,
                    stats.win_rate,
                    stats.total_pnl,
                    now,
                );
            }
        }

        // Remember this cycle's scores for collapse detection.
        {
            let mut last = state.last_scores.write();
            for (pool, eval) in evaluations {
                if eval.score.valid {
                    last.insert(pool.clone(), eval.score.tier4_score);
                } else {
                    last.remove(pool);
                }
            }
        }

        // The position book is the view; the ledger is the truth. The
        // commit lock guarantees we are not reading across a half-applied
        // open or close from the harmonic monitor.
        {
            let _commit = state.commit_lock.lock();
            let view_deployed: f64 = state
                .position_book
                .get_open_positions()
                .iter()
                .map(|p| p.size_usd)
                .sum();
            if let Err(e) = state.ledger.verify_view(view_deployed) {
                state.push_error_with_code(e.to_string(), Some("INVARIANT".to_string()));
            }
        }

        state.increment_version();
    }
}

/// DLMM bin pricing: each bin step compounds `binStep` basis points, so the
/// active bin id maps to a price of `(1 + step/10000)^bin`.
pub fn bin_price(active_bin: i32, bin_step_bps: u32) -> f64 {
    (1.0 + bin_step_bps as f64 / 10_000.0).powi(active_bin)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_price_identity_at_origin() {
        assert!((bin_price(0, 10) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bin_price_compounds_per_bin() {
        // One bin at 25 bps.
        assert!((bin_price(1, 25) - 1.0025).abs() < 1e-12);
        // Negative bins divide.
        assert!((bin_price(-1, 25) - 1.0 / 1.0025).abs() < 1e-12);
        // 100 bins at 10 bps compounds, not adds.
        let p = bin_price(100, 10);
        assert!(p > 1.10 && p < 1.11, "expected ~1.105, got {p:.5}");
    }
}
