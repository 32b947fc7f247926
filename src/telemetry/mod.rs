// =============================================================================
// Telemetry Module
// =============================================================================
//
// Bin-level microstructure ingestion for the decision core:
// - Per-pool bounded snapshot ring buffer (the ground truth all scoring reads)
// - Snapshot validation (monotonic timestamps, non-negative liquidity)
// - The polling loop that feeds the store from the venue's telemetry API

pub mod refresh;
pub mod snapshot_store;

pub use snapshot_store::{AppendError, BinLevel, PoolSnapshot, SnapshotStore};
