// =============================================================================
// Status API Module
// =============================================================================
//
// Read-only REST surface: a public health probe and the full engine state
// snapshot behind a bearer token.

pub mod auth;
pub mod rest;
