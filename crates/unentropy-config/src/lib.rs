// crates/unentropy-config/src/lib.rs
// ============================================================================
// Module: Unentropy Config Library
// Description: Storage configuration model and validation.
// Purpose: Single source of truth for unentropy.toml storage semantics.
// Dependencies: serde, toml, unentropy-store-sqlite
// ============================================================================

//! ## Overview
//! `unentropy-config` defines which medium backs the metrics database and
//! how connections to it are tuned. Validation is fail-closed: a missing
//! credential or malformed repository is rejected before any I/O happens.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
