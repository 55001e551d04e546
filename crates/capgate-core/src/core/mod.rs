// crates/capgate-core/src/core/mod.rs
// ============================================================================
// Module: Capgate Core Types
// Description: Canonical identifiers and registry records.
// Purpose: Provide stable, serializable types shared by every Capgate crate.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Core types describe capability scripts, access tokens, principals, and the
//! reconciliation plan produced when the plugin tree is compared against the
//! persisted registry.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod hex;
pub mod identifiers;
pub mod model;
pub mod reconcile;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use hex::hex_encode;
pub use identifiers::MAX_SCRIPT_NAME_BYTES;
pub use identifiers::ScriptName;
pub use identifiers::ScriptNameError;
pub use identifiers::TokenId;
pub use identifiers::UserId;
pub use model::AccessToken;
pub use model::CapabilityScript;
pub use model::ConfigMap;
pub use model::Principal;
pub use model::PrincipalDraft;
pub use model::Role;
pub use model::ScriptUpdate;
pub use model::TokenDraft;
pub use model::TokenKind;
pub use reconcile::ReconcilePlan;
