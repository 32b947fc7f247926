// =============================================================================
// Regime Module
// =============================================================================
//
// Macro regime machinery for the whole operator:
// - Classifier: maps aggregated market-wide signals to a proposed regime
// - Governor: hysteresis (dwell time, confirmations, bands) over proposals
// - Playbook: per-regime sizing, hold, exit, and cooldown parameters

pub mod classifier;
pub mod hysteresis;
pub mod playbook;

pub use classifier::{MacroRegime, MacroSignals};
pub use hysteresis::{RegimeGovernor, RegimeTransition};
pub use playbook::RegimeParams;
