// =============================================================================
// Pool Sharpe Memory — rolling per-pool performance statistics
// =============================================================================
//
// Every closed trade feeds this store. Per pool it maintains trade count,
// win/loss split, rolling PnL, max drawdown from that pool's peak equity,
// average R-multiple, and average hold duration.
//
// Sharpe is computed over a rolling window (default 7 days) of per-trade
// returns with an exponential decay of 0.9 per step of age, newest trade
// weighted 1.0:
//
//   sharpe = (weightedMean(returns) - riskFreeRate) / weightedStd(returns)
//
// Below `min_trades_for_sharpe` the pool gets `default_sharpe` so that young
// pools are neither boosted nor blocked on noise.
//
// Trade recording is idempotent by trade id: duplicate submissions (replays
// from the journal, retried persistence) are dropped.
// =============================================================================

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::runtime_config::SharpeParams;

/// Per-pool cap on retained returns; far beyond any rolling window.
const MAX_RETURNS_PER_POOL: usize = 500;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single closed trade, as reported by the execution layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub trade_id: String,
    pub pool: String,
    pub entry_time_ms: i64,
    pub exit_time_ms: i64,
    pub size_usd: f64,
    pub realized_pnl: f64,
    #[serde(default)]
    pub slippage_impact: f64,
    #[serde(default)]
    pub entry_score: f64,
    #[serde(default)]
    pub exit_score: f64,
    /// Capital at risk at entry; denominator of the R-multiple.
    #[serde(default)]
    pub risk_amount: f64,
}

/// Aggregated statistics for one pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolPerformance {
    pub trade_count: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub win_rate: f64,
    pub peak_equity: f64,
    pub max_drawdown: f64,
    pub avg_r_multiple: f64,
    pub avg_hold_ms: f64,
}

#[derive(Debug, Default)]
struct PoolRecord {
    perf: PoolPerformance,
    /// Cumulative equity curve state for drawdown tracking.
    equity: f64,
    /// Sum of R-multiples over trades with a positive risk amount.
    r_sum: f64,
    r_count: u32,
    hold_sum_ms: f64,
    /// (exit_time_ms, return fraction) per recorded trade, oldest first.
    returns: Vec<(i64, f64)>,
}

// ---------------------------------------------------------------------------
// SharpeMemory
// ---------------------------------------------------------------------------

/// Thread-safe per-pool performance memory.
pub struct SharpeMemory {
    params: SharpeParams,
    records: RwLock<HashMap<String, PoolRecord>>,
    seen_trades: RwLock<HashSet<String>>,
}

impl SharpeMemory {
    pub fn new(params: SharpeParams) -> Self {
        Self {
            params,
            records: RwLock::new(HashMap::new()),
            seen_trades: RwLock::new(HashSet::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Recording
    // -------------------------------------------------------------------------

    /// Record a closed trade. Returns false when the trade id was already
    /// seen (duplicate submission is a no-op).
    pub fn record(&self, outcome: &TradeOutcome) -> bool {
        {
            let mut seen = self.seen_trades.write();
            if !seen.insert(outcome.trade_id.clone()) {
                debug!(trade_id = %outcome.trade_id, "duplicate trade outcome ignored");
                return false;
            }
        }

        let mut records = self.records.write();
        let record = records.entry(outcome.pool.clone()).or_default();

        record.perf.trade_count += 1;
        record.perf.total_pnl += outcome.realized_pnl;
        if outcome.realized_pnl >= 0.0 {
            record.perf.wins += 1;
        } else {
            record.perf.losses += 1;
        }
        record.perf.avg_pnl = record.perf.total_pnl / record.perf.trade_count as f64;
        record.perf.win_rate = record.perf.wins as f64 / record.perf.trade_count as f64;

        // Drawdown from this pool's peak equity.
        record.equity += outcome.realized_pnl;
        if record.equity > record.perf.peak_equity {
            record.perf.peak_equity = record.equity;
        }
        let drawdown = record.perf.peak_equity - record.equity;
        if drawdown > record.perf.max_drawdown {
            record.perf.max_drawdown = drawdown;
        }

        if outcome.risk_amount > 0.0 {
            record.r_sum += outcome.realized_pnl / outcome.risk_amount;
            record.r_count += 1;
            record.perf.avg_r_multiple = record.r_sum / record.r_count as f64;
        }

        let hold_ms = (outcome.exit_time_ms - outcome.entry_time_ms).max(0) as f64;
        record.hold_sum_ms += hold_ms;
        record.perf.avg_hold_ms = record.hold_sum_ms / record.perf.trade_count as f64;

        let ret = if outcome.size_usd > 0.0 {
            outcome.realized_pnl / outcome.size_usd
        } else {
            0.0
        };
        record.returns.push((outcome.exit_time_ms, ret));
        if record.returns.len() > MAX_RETURNS_PER_POOL {
            let excess = record.returns.len() - MAX_RETURNS_PER_POOL;
            record.returns.drain(..excess);
        }

        debug!(
            pool = %outcome.pool,
            trade_id = %outcome.trade_id,
            pnl = outcome.realized_pnl,
            trades = record.perf.trade_count,
            "trade outcome recorded"
        );
        true
    }

    /// Replay prior outcomes from the journal at startup.
    pub fn warm_up(&self, outcomes: &[TradeOutcome]) {
        let mut accepted = 0;
        for outcome in outcomes {
            if self.record(outcome) {
                accepted += 1;
            }
        }
        info!(
            replayed = outcomes.len(),
            accepted, "sharpe memory warmed up from journal"
        );
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Decayed rolling Sharpe for a pool at `now_ms`.
    pub fn sharpe(&self, pool: &str, now_ms: i64) -> f64 {
        let records = self.records.read();
        let Some(record) = records.get(pool) else {
            return self.params.default_sharpe;
        };

        let window_start = now_ms - self.params.window_ms as i64;
        let in_window: Vec<f64> = record
            .returns
            .iter()
            .filter(|(t, _)| *t >= window_start)
            .map(|(_, r)| *r)
            .collect();

        if (in_window.len() as u32) < self.params.min_trades_for_sharpe {
            return self.params.default_sharpe;
        }

        // Newest trade carries weight 1.0, each older trade decays by 0.9.
        let n = in_window.len();
        let weights: Vec<f64> = (0..n)
            .map(|i| self.params.decay_factor.powi((n - 1 - i) as i32))
            .collect();
        let weight_sum: f64 = weights.iter().sum();

        let mean: f64 = in_window
            .iter()
            .zip(&weights)
            .map(|(r, w)| r * w)
            .sum::<f64>()
            / weight_sum;

        let variance: f64 = in_window
            .iter()
            .zip(&weights)
            .map(|(r, w)| w * (r - mean) * (r - mean))
            .sum::<f64>()
            / weight_sum;
        let std = variance.sqrt();

        if std < 1e-12 {
            // Degenerate: identical returns. Sign of the excess return
            // decides, capped to keep downstream interpolation sane.
            let excess = mean - self.params.risk_free_rate;
            return if excess > 0.0 {
                3.0
            } else if excess < 0.0 {
                -3.0
            } else {
                0.0
            };
        }

        (mean - self.params.risk_free_rate) / std
    }

    /// Sizing multiplier derived from the Sharpe thresholds. `None` means
    /// the pool is blocked outright.
    pub fn size_multiplier(&self, sharpe: f64) -> Option<f64> {
        if sharpe < self.params.block_threshold {
            return None;
        }
        if sharpe < self.params.reduce_threshold {
            return Some(0.5);
        }
        if sharpe > self.params.boost_threshold {
            return Some(1.25);
        }
        // Linear interpolation between the reduce and boost anchors.
        let t = (sharpe - self.params.reduce_threshold)
            / (self.params.boost_threshold - self.params.reduce_threshold);
        Some(0.5 + t * 0.75)
    }

    /// Map a raw Sharpe onto [0, 1] for priority scoring: -1 maps to 0,
    /// +2 maps to 1.
    pub fn normalized_sharpe(sharpe: f64) -> f64 {
        ((sharpe + 1.0) / 3.0).clamp(0.0, 1.0)
    }

    /// Aggregate statistics for a pool, if any trades were recorded.
    pub fn stats(&self, pool: &str) -> Option<PoolPerformance> {
        self.records.read().get(pool).map(|r| r.perf.clone())
    }

    /// Number of pools with at least one recorded trade.
    pub fn pool_count(&self) -> usize {
        self.records.read().len()
    }
}

impl std::fmt::Debug for SharpeMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharpeMemory")
            .field("pools", &self.pool_count())
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(trade_id: &str, pool: &str, pnl: f64, exit_time_ms: i64) -> TradeOutcome {
        TradeOutcome {
            trade_id: trade_id.to_string(),
            pool: pool.to_string(),
            entry_time_ms: exit_time_ms - 3_600_000,
            exit_time_ms,
            size_usd: 1_000.0,
            realized_pnl: pnl,
            slippage_impact: 0.0,
            entry_score: 40.0,
            exit_score: 30.0,
            risk_amount: 100.0,
        }
    }

    fn memory() -> SharpeMemory {
        SharpeMemory::new(SharpeParams::default())
    }

    #[test]
    fn test_unknown_pool_gets_default_sharpe() {
        let mem = memory();
        assert!((mem.sharpe("nope", 0) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_below_min_trades_gets_default_sharpe() {
        let mem = memory();
        mem.record(&outcome("t1", "p", 10.0, 1_000));
        mem.record(&outcome("t2", "p", -5.0, 2_000));
        assert!((mem.sharpe("p", 10_000) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_duplicate_trade_id_is_idempotent() {
        let mem = memory();
        assert!(mem.record(&outcome("t1", "p", 10.0, 1_000)));
        assert!(!mem.record(&outcome("t1", "p", 10.0, 1_000)));

        let stats = mem.stats("p").unwrap();
        assert_eq!(stats.trade_count, 1);
        assert!((stats.total_pnl - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_win_loss_and_drawdown_tracking() {
        let mem = memory();
        mem.record(&outcome("t1", "p", 100.0, 1_000));
        mem.record(&outcome("t2", "p", -40.0, 2_000));
        mem.record(&outcome("t3", "p", -30.0, 3_000));
        mem.record(&outcome("t4", "p", 50.0, 4_000));

        let stats = mem.stats("p").unwrap();
        assert_eq!(stats.trade_count, 4);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 2);
        assert!((stats.total_pnl - 80.0).abs() < 1e-10);
        assert!((stats.win_rate - 0.5).abs() < 1e-10);
        // Peak 100, trough 30 -> max drawdown 70.
        assert!((stats.peak_equity - 100.0).abs() < 1e-10);
        assert!((stats.max_drawdown - 70.0).abs() < 1e-10);
        // R-multiples: 1.0, -0.4, -0.3, 0.5 -> avg 0.2.
        assert!((stats.avg_r_multiple - 0.2).abs() < 1e-10);
    }

    #[test]
    fn test_profitable_pool_positive_sharpe() {
        let mem = memory();
        mem.record(&outcome("t1", "p", 20.0, 1_000));
        mem.record(&outcome("t2", "p", 30.0, 2_000));
        mem.record(&outcome("t3", "p", 25.0, 3_000));
        mem.record(&outcome("t4", "p", 35.0, 4_000));
        let sharpe = mem.sharpe("p", 10_000);
        assert!(sharpe > 1.5, "steadily profitable pool, got {:.3}", sharpe);
    }

    #[test]
    fn test_losing_pool_negative_sharpe() {
        let mem = memory();
        mem.record(&outcome("t1", "p", -20.0, 1_000));
        mem.record(&outcome("t2", "p", -30.0, 2_000));
        mem.record(&outcome("t3", "p", -25.0, 3_000));
        mem.record(&outcome("t4", "p", -35.0, 4_000));
        let sharpe = mem.sharpe("p", 10_000);
        assert!(sharpe < -1.0, "steadily losing pool, got {:.3}", sharpe);
    }

    #[test]
    fn test_window_excludes_stale_trades() {
        let mem = memory();
        let week_ms = 7 * 24 * 60 * 60 * 1_000i64;
        // Three old losers outside the window, two recent trades inside.
        mem.record(&outcome("t1", "p", -50.0, 0));
        mem.record(&outcome("t2", "p", -50.0, 1_000));
        mem.record(&outcome("t3", "p", -50.0, 2_000));
        mem.record(&outcome("t4", "p", 10.0, week_ms + 100_000));
        mem.record(&outcome("t5", "p", 12.0, week_ms + 200_000));

        // Only two in-window trades: below min -> default, not negative.
        let sharpe = mem.sharpe("p", 2 * week_ms);
        assert!((sharpe - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_identical_returns_capped_sharpe() {
        let mem = memory();
        mem.record(&outcome("t1", "p", 10.0, 1_000));
        mem.record(&outcome("t2", "p", 10.0, 2_000));
        mem.record(&outcome("t3", "p", 10.0, 3_000));
        assert!((mem.sharpe("p", 10_000) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_size_multiplier_thresholds() {
        let mem = memory();
        assert!(mem.size_multiplier(-1.5).is_none(), "deep negative blocks");
        assert_eq!(mem.size_multiplier(0.0), Some(0.5));
        assert_eq!(mem.size_multiplier(2.0), Some(1.25));

        // Interpolation anchors.
        let at_reduce = mem.size_multiplier(0.3).unwrap();
        assert!((at_reduce - 0.5).abs() < 1e-10);
        let at_boost = mem.size_multiplier(1.5).unwrap();
        assert!((at_boost - 1.25).abs() < 1e-10);
        let mid = mem.size_multiplier(0.9).unwrap();
        assert!((mid - 0.875).abs() < 1e-10);
    }

    #[test]
    fn test_normalized_sharpe_range() {
        assert!((SharpeMemory::normalized_sharpe(-1.0) - 0.0).abs() < f64::EPSILON);
        assert!((SharpeMemory::normalized_sharpe(2.0) - 1.0).abs() < f64::EPSILON);
        assert!((SharpeMemory::normalized_sharpe(0.5) - 0.5).abs() < f64::EPSILON);
        assert!((SharpeMemory::normalized_sharpe(-5.0) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_warm_up_replays_idempotently() {
        let mem = memory();
        let outcomes = vec![
            outcome("t1", "p", 10.0, 1_000),
            outcome("t1", "p", 10.0, 1_000),
            outcome("t2", "p", 20.0, 2_000),
        ];
        mem.warm_up(&outcomes);
        let stats = mem.stats("p").unwrap();
        assert_eq!(stats.trade_count, 2);
    }
}
