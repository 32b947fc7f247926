// =============================================================================
// Risk Module
// =============================================================================
//
// Capital protection for the portfolio:
// - Risk bucket engine: score -> tier -> leverage/size assignment under
//   portfolio capacity constraints
// - Portfolio ledger: the single authoritative store of capital state

pub mod bucket;
pub mod ledger;

pub use bucket::{PortfolioView, RejectReason, RiskAssignment, RiskBucketEngine, RiskTier};
pub use ledger::{LedgerError, LedgerSnapshot, PortfolioLedger};
