// =============================================================================
// Harmonic Stops Module
// =============================================================================
//
// State-based per-position health control: each position carries an
// immutable baseline of the microstructure at entry, and every cycle the
// current microstructure is compared against it. The controller never reads
// price — only health relative to baseline.

pub mod monitor;
pub mod stops;

pub use stops::{
    HarmonicBaseline, HarmonicDecision, HarmonicError, HarmonicStops, MicroObservation,
    StopAction, TierTolerance,
};
