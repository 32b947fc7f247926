// =============================================================================
// Universe Module
// =============================================================================
//
// Which pools the engine is allowed to look at, and how well each has paid:
// - Sharpe memory: rolling per-pool performance statistics with decay
// - Adaptive universe: DISCOVERY / ACTIVE / PROBATION / BLOCKED / EXPIRED
//   lifecycle driven by those statistics

pub mod adaptive;
pub mod sharpe_memory;

pub use adaptive::{AdaptivePoolUniverse, PoolStatus, UniverseEntry, UniverseEvent};
pub use sharpe_memory::{PoolPerformance, SharpeMemory, TradeOutcome};
