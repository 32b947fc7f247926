// =============================================================================
// Shared types used across the Meridian liquidity engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Whether the engine is actively deploying liquidity or paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
        }
    }
}

/// Whether we are running against real venue capital or a simulated book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Paper,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "Paper"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Raw pool descriptor as returned by the venue's listing endpoint.
///
/// These are the slow-changing 24h-aggregate fields, distinct from the
/// bin-level microstructure snapshots the decision core scores on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolDescriptor {
    /// Opaque pool address.
    pub address: String,
    /// Human-readable pair label, e.g. "SOL-USDC".
    pub name: String,
    pub mint_x: String,
    pub mint_y: String,
    #[serde(default)]
    pub liquidity_usd: f64,
    #[serde(default)]
    pub volume_1h: f64,
    #[serde(default)]
    pub volume_4h: f64,
    #[serde(default)]
    pub volume_24h: f64,
    #[serde(default)]
    pub fees_24h: f64,
    #[serde(default)]
    pub apr: f64,
    /// Price spacing between consecutive bins, in basis points.
    #[serde(default)]
    pub bin_step: u32,
    /// Base fee rate as a fraction (0.003 = 30 bps).
    #[serde(default)]
    pub base_fee_rate: f64,
    #[serde(default)]
    pub created_at: Option<String>,
}
