// crates/capgate-core/src/lib.rs
// ============================================================================
// Module: Capgate Core Library
// Description: Public API surface for the Capgate core.
// Purpose: Expose registry types, store interfaces, and runtime policy.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Capgate core holds the security-critical decision logic of the gateway:
//! the capability-script registry model, the authorization resolver, the
//! abuse guard state machine, and token administration policy. It performs
//! no network or filesystem I/O; persistence is reached through the
//! [`RegistryStore`] interface.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::RegistryStore;
pub use interfaces::StoreError;
pub use runtime::AbuseGuard;
pub use runtime::AuthorizationResolver;
pub use runtime::BanEntry;
pub use runtime::CidrBlock;
pub use runtime::CidrParseError;
pub use runtime::Decision;
pub use runtime::DenyReason;
pub use runtime::FailureOutcome;
pub use runtime::Grant;
pub use runtime::GuardClock;
pub use runtime::GuardPolicy;
pub use runtime::GuardState;
pub use runtime::InMemoryRegistryStore;
pub use runtime::ManualClock;
pub use runtime::MintRequest;
pub use runtime::SystemClock;
pub use runtime::TokenAdmin;
pub use runtime::TokenPolicyError;
pub use runtime::Verdict;
pub use runtime::check_manage;
pub use runtime::check_scope;
pub use runtime::decide;
pub use runtime::generate_secret;
