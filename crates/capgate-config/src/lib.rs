// crates/capgate-config/src/lib.rs
// ============================================================================
// Module: Capgate Config Library
// Description: Canonical config model, validation, and example payload.
// Purpose: Single source of truth for capgate.toml semantics.
// Dependencies: capgate-core, capgate-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `capgate-config` defines the configuration model for the gateway. Loading
//! is strict and fail-closed: oversized, non-UTF-8, unknown, or inconsistent
//! input is rejected before any component is built.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use examples::config_toml_example;
