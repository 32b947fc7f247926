// =============================================================================
// Runtime Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub for the Meridian liquidity engine.  Every tunable
// parameter lives here so that the engine can be reconfigured at runtime
// without a restart.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// Environment variables (MERIDIAN_*) override the file-based values after
// load; see `apply_env_overrides`.
//
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{AccountMode, TradingMode};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_loop_interval_ms() -> u64 {
    120_000
}

fn default_telemetry_refresh_ms() -> u64 {
    10_000
}

fn default_history_length() -> usize {
    20
}

fn default_min_snapshots() -> usize {
    3
}

fn default_cycle_budget_ms() -> u64 {
    90_000
}

fn default_io_timeout_ms() -> u64 {
    10_000
}

fn default_total_capital_usd() -> f64 {
    10_000.0
}

fn default_paper_capital_usd() -> f64 {
    10_000.0
}

fn default_true() -> bool {
    true
}

fn default_max_positions() -> u32 {
    8
}

fn default_max_positions_per_tier() -> u32 {
    4
}

fn default_max_pool_ownership_pct() -> f64 {
    8.0
}

fn default_max_deployment_pct() -> f64 {
    25.0
}

fn default_min_operating_capital_usd() -> f64 {
    500.0
}

fn default_migration_penalty_slope() -> f64 {
    -0.02
}

fn default_migration_penalty_factor() -> f64 {
    0.5
}

fn default_bootstrap_min_score() -> f64 {
    20.0
}

fn default_min_dwell_ms() -> u64 {
    180_000
}

fn default_confirm_required() -> u32 {
    3
}

fn default_confirm_window() -> usize {
    5
}

fn default_entropy_band() -> f64 {
    0.05
}

fn default_velocity_band() -> f64 {
    5.0
}

fn default_slope_band() -> f64 {
    0.005
}

fn default_consistency_band() -> f64 {
    0.05
}

fn default_sharpe_window_ms() -> u64 {
    7 * 24 * 60 * 60 * 1000
}

fn default_sharpe_decay() -> f64 {
    0.9
}

fn default_min_trades_for_sharpe() -> u32 {
    3
}

fn default_default_sharpe() -> f64 {
    0.5
}

fn default_sharpe_block_threshold() -> f64 {
    -1.0
}

fn default_sharpe_reduce_threshold() -> f64 {
    0.3
}

fn default_sharpe_boost_threshold() -> f64 {
    1.5
}

fn default_stale_time_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_max_block_count() -> u32 {
    3
}

fn default_min_trades_for_activation() -> u32 {
    3
}

fn default_min_hold_time_ms() -> u64 {
    60_000
}

fn default_harmonic_velocity_weight() -> f64 {
    0.30
}

fn default_harmonic_entropy_weight() -> f64 {
    0.20
}

fn default_harmonic_liquidity_weight() -> f64 {
    0.20
}

fn default_harmonic_slope_weight() -> f64 {
    0.15
}

fn default_harmonic_floor_weight() -> f64 {
    0.15
}

fn default_collapse_min_pools() -> u32 {
    3
}

fn default_collapse_window_ms() -> u64 {
    120_000
}

fn default_whale_min_pools() -> u32 {
    2
}

fn default_whale_bin_jump() -> i32 {
    12
}

fn default_exodus_pool_fraction() -> f64 {
    0.5
}

fn default_exodus_liquidity_drop() -> f64 {
    0.30
}

fn default_missing_snapshot_fraction() -> f64 {
    0.5
}

fn default_kill_cooldown_ms() -> u64 {
    120_000
}

// =============================================================================
// Parameter groups
// =============================================================================

/// Portfolio-level capacity limits consumed by the risk bucket engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioParams {
    /// Maximum number of concurrent open positions across all tiers.
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,

    /// Maximum number of concurrent positions per risk tier.
    #[serde(default = "default_max_positions_per_tier")]
    pub max_positions_per_tier: u32,

    /// Per-pool base size cap as a percentage of total capital.
    #[serde(default = "default_max_pool_ownership_pct")]
    pub max_pool_ownership_pct: f64,

    /// Maximum total deployment as a percentage of total capital.
    #[serde(default = "default_max_deployment_pct")]
    pub max_deployment_pct: f64,

    /// Below this much total capital the whole cycle is gated off.
    #[serde(default = "default_min_operating_capital_usd")]
    pub min_operating_capital_usd: f64,

    /// Liquidity slope (fraction of TVL per minute) below which the
    /// migration penalty halves position size.
    #[serde(default = "default_migration_penalty_slope")]
    pub migration_penalty_slope_per_min: f64,

    /// Multiplier applied when the migration penalty fires.
    #[serde(default = "default_migration_penalty_factor")]
    pub migration_penalty_factor: f64,
}

impl Default for PortfolioParams {
    fn default() -> Self {
        Self {
            max_positions: default_max_positions(),
            max_positions_per_tier: default_max_positions_per_tier(),
            max_pool_ownership_pct: default_max_pool_ownership_pct(),
            max_deployment_pct: default_max_deployment_pct(),
            min_operating_capital_usd: default_min_operating_capital_usd(),
            migration_penalty_slope_per_min: default_migration_penalty_slope(),
            migration_penalty_factor: default_migration_penalty_factor(),
        }
    }
}

/// Regime-switch hysteresis parameters.
///
/// A regime flip requires all three: minimum dwell time in the current
/// regime, M-of-N consecutive confirmations, and the raw signal crossing
/// the rule boundary plus the relevant band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HysteresisParams {
    #[serde(default = "default_min_dwell_ms")]
    pub min_dwell_ms: u64,

    /// A new regime must be proposed in M of the last N cycles.
    #[serde(default = "default_confirm_required")]
    pub confirm_required: u32,

    #[serde(default = "default_confirm_window")]
    pub confirm_window: usize,

    #[serde(default = "default_entropy_band")]
    pub entropy_band: f64,

    #[serde(default = "default_velocity_band")]
    pub velocity_band: f64,

    #[serde(default = "default_slope_band")]
    pub slope_band: f64,

    #[serde(default = "default_consistency_band")]
    pub consistency_band: f64,
}

impl Default for HysteresisParams {
    fn default() -> Self {
        Self {
            min_dwell_ms: default_min_dwell_ms(),
            confirm_required: default_confirm_required(),
            confirm_window: default_confirm_window(),
            entropy_band: default_entropy_band(),
            velocity_band: default_velocity_band(),
            slope_band: default_slope_band(),
            consistency_band: default_consistency_band(),
        }
    }
}

/// Rolling per-pool Sharpe memory behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharpeParams {
    /// Rolling window over which trade returns contribute.
    #[serde(default = "default_sharpe_window_ms")]
    pub window_ms: u64,

    /// Exponential decay applied per trade of age (newest weight 1.0).
    #[serde(default = "default_sharpe_decay")]
    pub decay_factor: f64,

    #[serde(default = "default_min_trades_for_sharpe")]
    pub min_trades_for_sharpe: u32,

    /// Sharpe assumed for pools with insufficient history.
    #[serde(default = "default_default_sharpe")]
    pub default_sharpe: f64,

    #[serde(default)]
    pub risk_free_rate: f64,

    /// Sharpe below this blocks the pool outright.
    #[serde(default = "default_sharpe_block_threshold")]
    pub block_threshold: f64,

    /// Sharpe below this halves sizing.
    #[serde(default = "default_sharpe_reduce_threshold")]
    pub reduce_threshold: f64,

    /// Sharpe above this boosts sizing to 1.25x.
    #[serde(default = "default_sharpe_boost_threshold")]
    pub boost_threshold: f64,
}

impl Default for SharpeParams {
    fn default() -> Self {
        Self {
            window_ms: default_sharpe_window_ms(),
            decay_factor: default_sharpe_decay(),
            min_trades_for_sharpe: default_min_trades_for_sharpe(),
            default_sharpe: default_default_sharpe(),
            risk_free_rate: 0.0,
            block_threshold: default_sharpe_block_threshold(),
            reduce_threshold: default_sharpe_reduce_threshold(),
            boost_threshold: default_sharpe_boost_threshold(),
        }
    }
}

/// Adaptive pool universe lifecycle parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseParams {
    /// Pools inactive for longer than this expire (except BLOCKED pools).
    #[serde(default = "default_stale_time_ms")]
    pub stale_time_ms: u64,

    /// A pool blocked this many times is permanently removed.
    #[serde(default = "default_max_block_count")]
    pub max_block_count: u32,

    /// Trades required before DISCOVERY can graduate to ACTIVE.
    #[serde(default = "default_min_trades_for_activation")]
    pub min_trades_for_activation: u32,
}

impl Default for UniverseParams {
    fn default() -> Self {
        Self {
            stale_time_ms: default_stale_time_ms(),
            max_block_count: default_max_block_count(),
            min_trades_for_activation: default_min_trades_for_activation(),
        }
    }
}

/// Component weights for the harmonic health score. Must sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarmonicWeights {
    #[serde(default = "default_harmonic_velocity_weight")]
    pub velocity: f64,
    #[serde(default = "default_harmonic_entropy_weight")]
    pub entropy: f64,
    #[serde(default = "default_harmonic_liquidity_weight")]
    pub liquidity: f64,
    #[serde(default = "default_harmonic_slope_weight")]
    pub slope: f64,
    #[serde(default = "default_harmonic_floor_weight")]
    pub floors: f64,
}

impl Default for HarmonicWeights {
    fn default() -> Self {
        Self {
            velocity: default_harmonic_velocity_weight(),
            entropy: default_harmonic_entropy_weight(),
            liquidity: default_harmonic_liquidity_weight(),
            slope: default_harmonic_slope_weight(),
            floors: default_harmonic_floor_weight(),
        }
    }
}

/// Per-position harmonic stop parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarmonicParams {
    /// Grace period after entry during which the controller always holds.
    #[serde(default = "default_min_hold_time_ms")]
    pub min_hold_time_ms: u64,

    #[serde(default)]
    pub weights: HarmonicWeights,
}

impl Default for HarmonicParams {
    fn default() -> Self {
        Self {
            min_hold_time_ms: default_min_hold_time_ms(),
            weights: HarmonicWeights::default(),
        }
    }
}

/// Portfolio-wide catastrophe detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchParams {
    /// Simultaneous pool health collapses required to trip.
    #[serde(default = "default_collapse_min_pools")]
    pub collapse_min_pools: u32,

    /// Window over which collapses count as simultaneous.
    #[serde(default = "default_collapse_window_ms")]
    pub collapse_window_ms: u64,

    /// Pools with a coordinated large active-bin jump required to trip.
    #[serde(default = "default_whale_min_pools")]
    pub whale_min_pools: u32,

    /// Active-bin jump (bins per snapshot step) considered whale-sized.
    #[serde(default = "default_whale_bin_jump")]
    pub whale_bin_jump: i32,

    /// Fraction of tracked pools losing liquidity that counts as exodus.
    #[serde(default = "default_exodus_pool_fraction")]
    pub exodus_pool_fraction: f64,

    /// Per-pool liquidity loss fraction that counts toward exodus.
    #[serde(default = "default_exodus_liquidity_drop")]
    pub exodus_liquidity_drop_pct: f64,

    /// Fraction of pools with missing snapshots that marks telemetry
    /// unreliable.
    #[serde(default = "default_missing_snapshot_fraction")]
    pub missing_snapshot_fraction: f64,

    /// Cooldown after a kill during which the entry gate rejects all pools.
    #[serde(default = "default_kill_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for KillSwitchParams {
    fn default() -> Self {
        Self {
            collapse_min_pools: default_collapse_min_pools(),
            collapse_window_ms: default_collapse_window_ms(),
            whale_min_pools: default_whale_min_pools(),
            whale_bin_jump: default_whale_bin_jump(),
            exodus_pool_fraction: default_exodus_pool_fraction(),
            exodus_liquidity_drop_pct: default_exodus_liquidity_drop(),
            missing_snapshot_fraction: default_missing_snapshot_fraction(),
            cooldown_ms: default_kill_cooldown_ms(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the Meridian engine.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Operational modes ---------------------------------------------------

    /// Current trading mode: Live or Paused.
    #[serde(default)]
    pub trading_mode: TradingMode,

    /// Whether running against real capital or a simulated book.
    #[serde(default)]
    pub account_mode: AccountMode,

    // --- Cadence & retention -------------------------------------------------

    /// Decision cycle cadence.
    #[serde(default = "default_loop_interval_ms")]
    pub loop_interval_ms: u64,

    /// Snapshot polling cadence.
    #[serde(default = "default_telemetry_refresh_ms")]
    pub telemetry_refresh_ms: u64,

    /// Per-pool snapshot ring size.
    #[serde(default = "default_history_length")]
    pub history_length: usize,

    /// Minimum snapshots before any derived metric is defined.
    #[serde(default = "default_min_snapshots")]
    pub min_snapshots: usize,

    /// Overall wall-clock budget for one decision cycle. Residual steps are
    /// deferred to the next cycle when exceeded, never forced.
    #[serde(default = "default_cycle_budget_ms")]
    pub cycle_budget_ms: u64,

    /// Timeout applied to each external I/O call.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    // --- Capital -------------------------------------------------------------

    /// Total capital when running live.
    #[serde(default = "default_total_capital_usd")]
    pub total_capital_usd: f64,

    /// Total capital when running in paper mode.
    #[serde(default = "default_paper_capital_usd")]
    pub paper_capital_usd: f64,

    // --- Scoring -------------------------------------------------------------

    /// Minimum bootstrap score for a pool with no telemetry history to be
    /// admissible.
    #[serde(default = "default_bootstrap_min_score")]
    pub bootstrap_min_score: f64,

    /// Log every pillar and multiplier at debug level per pool per cycle.
    #[serde(default)]
    pub verbose_scoring: bool,

    // --- Invariant enforcement ----------------------------------------------

    /// When true, ledger/view consistency failures panic instead of merely
    /// logging. Enabled by default outside of release deployments.
    #[serde(default = "default_true")]
    pub strict_invariants: bool,

    // --- Parameter groups ----------------------------------------------------

    #[serde(default)]
    pub portfolio: PortfolioParams,

    #[serde(default)]
    pub hysteresis: HysteresisParams,

    #[serde(default)]
    pub sharpe: SharpeParams,

    #[serde(default)]
    pub universe: UniverseParams,

    #[serde(default)]
    pub harmonic: HarmonicParams,

    #[serde(default)]
    pub kill_switch: KillSwitchParams,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paused,
            account_mode: AccountMode::Paper,
            loop_interval_ms: default_loop_interval_ms(),
            telemetry_refresh_ms: default_telemetry_refresh_ms(),
            history_length: default_history_length(),
            min_snapshots: default_min_snapshots(),
            cycle_budget_ms: default_cycle_budget_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            total_capital_usd: default_total_capital_usd(),
            paper_capital_usd: default_paper_capital_usd(),
            bootstrap_min_score: default_bootstrap_min_score(),
            verbose_scoring: false,
            strict_invariants: true,
            portfolio: PortfolioParams::default(),
            hysteresis: HysteresisParams::default(),
            sharpe: SharpeParams::default(),
            universe: UniverseParams::default(),
            harmonic: HarmonicParams::default(),
            kill_switch: KillSwitchParams::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            trading_mode = %config.trading_mode,
            account_mode = %config.account_mode,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    ///
    /// This prevents corruption if the process crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        // Atomic write: write to a temporary sibling file, then rename.
        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply MERIDIAN_* environment overrides on top of the loaded file.
    ///
    /// Recognized keys: MERIDIAN_TOTAL_CAPITAL, MERIDIAN_PAPER,
    /// MERIDIAN_PAPER_CAPITAL, MERIDIAN_VERBOSE_SCORING. Endpoint and
    /// credential keys are consumed directly by the venue client.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MERIDIAN_TOTAL_CAPITAL") {
            match v.parse::<f64>() {
                Ok(cap) if cap > 0.0 => self.total_capital_usd = cap,
                _ => warn!(value = %v, "ignoring invalid MERIDIAN_TOTAL_CAPITAL"),
            }
        }

        if let Ok(v) = std::env::var("MERIDIAN_PAPER") {
            self.account_mode = if matches!(v.as_str(), "0" | "false" | "no") {
                AccountMode::Live
            } else {
                AccountMode::Paper
            };
        }

        if let Ok(v) = std::env::var("MERIDIAN_PAPER_CAPITAL") {
            match v.parse::<f64>() {
                Ok(cap) if cap > 0.0 => self.paper_capital_usd = cap,
                _ => warn!(value = %v, "ignoring invalid MERIDIAN_PAPER_CAPITAL"),
            }
        }

        if let Ok(v) = std::env::var("MERIDIAN_VERBOSE_SCORING") {
            self.verbose_scoring = !matches!(v.as_str(), "0" | "false" | "no");
        }
    }

    /// Capital the ledger should be seeded with for the active account mode.
    pub fn effective_capital(&self) -> f64 {
        match self.account_mode {
            AccountMode::Paper => self.paper_capital_usd,
            AccountMode::Live => self.total_capital_usd,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.account_mode, AccountMode::Paper);
        assert_eq!(cfg.loop_interval_ms, 120_000);
        assert_eq!(cfg.telemetry_refresh_ms, 10_000);
        assert_eq!(cfg.history_length, 20);
        assert_eq!(cfg.min_snapshots, 3);
        assert_eq!(cfg.portfolio.max_positions, 8);
        assert!((cfg.portfolio.max_deployment_pct - 25.0).abs() < f64::EPSILON);
        assert!((cfg.portfolio.max_pool_ownership_pct - 8.0).abs() < f64::EPSILON);
        assert_eq!(cfg.hysteresis.min_dwell_ms, 180_000);
        assert_eq!(cfg.hysteresis.confirm_required, 3);
        assert_eq!(cfg.hysteresis.confirm_window, 5);
        assert!((cfg.sharpe.decay_factor - 0.9).abs() < f64::EPSILON);
        assert!((cfg.sharpe.default_sharpe - 0.5).abs() < f64::EPSILON);
        assert_eq!(cfg.kill_switch.collapse_min_pools, 3);
        assert_eq!(cfg.kill_switch.cooldown_ms, 120_000);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.account_mode, AccountMode::Paper);
        assert_eq!(cfg.history_length, 20);
        assert_eq!(cfg.universe.max_block_count, 3);
        assert_eq!(cfg.harmonic.min_hold_time_ms, 60_000);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "trading_mode": "Live", "history_length": 30 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Live);
        assert_eq!(cfg.history_length, 30);
        assert_eq!(cfg.min_snapshots, 3);
        assert_eq!(cfg.portfolio.max_positions_per_tier, 4);
    }

    #[test]
    fn harmonic_weights_sum_to_one() {
        let w = HarmonicWeights::default();
        let sum = w.velocity + w.entropy + w.liquidity + w.slope + w.floors;
        assert!(
            (sum - 1.0).abs() < 1e-10,
            "harmonic weights must sum to 1, got {:.6}",
            sum
        );
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.loop_interval_ms, cfg2.loop_interval_ms);
        assert_eq!(cfg.trading_mode, cfg2.trading_mode);
        assert_eq!(cfg.portfolio.max_positions, cfg2.portfolio.max_positions);
    }

    #[test]
    fn effective_capital_follows_account_mode() {
        let mut cfg = RuntimeConfig::default();
        cfg.total_capital_usd = 50_000.0;
        cfg.paper_capital_usd = 1_000.0;

        cfg.account_mode = AccountMode::Paper;
        assert!((cfg.effective_capital() - 1_000.0).abs() < f64::EPSILON);

        cfg.account_mode = AccountMode::Live;
        assert!((cfg.effective_capital() - 50_000.0).abs() < f64::EPSILON);
    }
}
