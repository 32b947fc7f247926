// =============================================================================
// Microstructure Module
// =============================================================================
//
// Short-window, bin-level measurement pipeline for the decision core:
// - Per-cycle metrics (bin velocity, swap velocity, liquidity flow, fee
//   intensity) derived from consecutive snapshots
// - Shannon entropy of the bin liquidity distribution
// - Momentum slopes (first derivatives) via least-squares regression
// - Time-weighted consistency tracking over a 30-minute rolling buffer

pub mod entropy;
pub mod metrics;
pub mod momentum;
pub mod time_weight;

pub use entropy::pool_entropy;
pub use metrics::MicrostructureMetrics;
pub use momentum::MomentumSlopes;
pub use time_weight::{TimeWeightResult, TimeWeightTracker};
