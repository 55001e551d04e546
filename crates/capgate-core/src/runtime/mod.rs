// crates/capgate-core/src/runtime/mod.rs
// ============================================================================
// Module: Capgate Runtime
// Description: Authorization, abuse protection, and token administration.
// Purpose: Hold the decision logic shared by the dispatcher and admin tooling.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime components return typed outcomes. Translating an outcome into a
//! response status is the dispatcher's job, not theirs.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod authz;
pub mod cidr;
pub mod guard;
pub mod store;
pub mod tokens;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use authz::AuthorizationResolver;
pub use authz::Decision;
pub use authz::DenyReason;
pub use authz::Grant;
pub use authz::Verdict;
pub use authz::decide;
pub use cidr::CidrBlock;
pub use cidr::CidrParseError;
pub use guard::AbuseGuard;
pub use guard::BanEntry;
pub use guard::FailureOutcome;
pub use guard::GuardClock;
pub use guard::GuardPolicy;
pub use guard::GuardState;
pub use guard::ManualClock;
pub use guard::SystemClock;
pub use store::InMemoryRegistryStore;
pub use tokens::MintRequest;
pub use tokens::TokenAdmin;
pub use tokens::TokenPolicyError;
pub use tokens::check_manage;
pub use tokens::check_scope;
pub use tokens::generate_secret;
