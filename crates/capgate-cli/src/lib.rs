// crates/capgate-cli/src/lib.rs
// ============================================================================
// Module: Capgate CLI Library
// Description: Shared helpers for the Capgate command-line interface.
// Purpose: Provide reusable components for the CLI binary and tests.
// Dependencies: capgate-core, capgate-config, capgate-scripts, capgate-gateway
// ============================================================================

//! ## Overview
//! This library houses the message catalog, the serve bind policy, the bundled
//! handler catalog, and the registry administration helpers. The binary entry
//! point (`src/main.rs`) wires them to `clap` subcommands.
//!
//! Security posture: CLI inputs are untrusted and must be validated.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod admin;
pub mod builtin;
/// Message catalog for user-facing output.
pub mod i18n;
pub mod serve_policy;
