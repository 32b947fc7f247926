// =============================================================================
// Venue Module
// =============================================================================
//
// Signed REST access to the DLMM venue's telemetry and liquidity endpoints.
// The decision core only ever sees the typed operations exposed here;
// paper-mode simulation lives in the execution engine, not in the client.

pub mod client;
pub mod rate_limit;

pub use client::VenueClient;
pub use rate_limit::RateLimitTracker;
