// =============================================================================
// Scoring Module
// =============================================================================
//
// Composite pool scoring for the decision core:
// - Tier-4 scorer: pillar scores x regime x migration x slope x time-weight
// - Bootstrap scorer: coarse-metric fallback for pools without telemetry

pub mod bootstrap;
pub mod tier4;

pub use bootstrap::{BootstrapScore, BootstrapScorer};
pub use tier4::{
    BinWidthConfig, MigrationDirection, PillarScores, ScoreRegime, Tier4Score, Tier4Scorer,
};
