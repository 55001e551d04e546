// crates/capgate-core/src/interfaces/mod.rs
// ============================================================================
// Module: Capgate Interfaces
// Description: Backend-agnostic persistence interface for the registry.
// Purpose: Decouple dispatch and administration from storage engines.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! [`RegistryStore`] is the only path between the gateway and persisted
//! scripts, tokens, and principals. Implementations are injected at server
//! construction; nothing in the dispatch path reaches for ambient state.
//!
//! Implementations must make [`RegistryStore::apply_reconciliation`] atomic:
//! a concurrent reader observes either the full old mapping or the full new
//! one.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::AccessToken;
use crate::core::CapabilityScript;
use crate::core::Principal;
use crate::core::PrincipalDraft;
use crate::core::ReconcilePlan;
use crate::core::ScriptName;
use crate::core::ScriptUpdate;
use crate::core::TokenDraft;
use crate::core::TokenId;
use crate::core::UserId;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Registry store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("registry store io error: {0}")]
    Io(String),
    /// Store data is corrupted.
    #[error("registry store corruption: {0}")]
    Corrupt(String),
    /// Store data version is incompatible.
    #[error("registry store version mismatch: {0}")]
    VersionMismatch(String),
    /// Store data or request is invalid.
    #[error("registry store invalid data: {0}")]
    Invalid(String),
    /// Write conflicts with existing records.
    #[error("registry store conflict: {0}")]
    Conflict(String),
    /// Store reported an error.
    #[error("registry store error: {0}")]
    Store(String),
}

// ============================================================================
// SECTION: Registry Store
// ============================================================================

/// Persistence for scripts, tokens, and principals.
pub trait RegistryStore: Send + Sync {
    /// Loads a script record by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn script(&self, name: &ScriptName) -> Result<Option<CapabilityScript>, StoreError>;

    /// Lists every script record ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn scripts(&self) -> Result<Vec<CapabilityScript>, StoreError>;

    /// Returns the stored `name -> relative path` mapping.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn script_paths(&self) -> Result<BTreeMap<ScriptName, String>, StoreError> {
        Ok(self.scripts()?.into_iter().map(|script| (script.name, script.path)).collect())
    }

    /// Applies a reconciliation plan as one transaction.
    ///
    /// Added scripts are inserted offline and private. Removing a script
    /// also drops it from token scopes and principal permissions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when any change fails; no change is committed.
    fn apply_reconciliation(&self, plan: &ReconcilePlan) -> Result<(), StoreError>;

    /// Applies administrative edits to a script record.
    ///
    /// Returns `false` when the script does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn update_script(&self, name: &ScriptName, update: &ScriptUpdate) -> Result<bool, StoreError>;

    /// Looks up a token by its secret value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn token_by_secret(&self, secret: &str) -> Result<Option<AccessToken>, StoreError>;

    /// Loads a token by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn token(&self, id: TokenId) -> Result<Option<AccessToken>, StoreError>;

    /// Inserts a new active token and assigns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails or references unknown scripts.
    fn insert_token(&self, draft: TokenDraft, secret: String) -> Result<AccessToken, StoreError>;

    /// Replaces an existing token record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when the token does not exist.
    fn save_token(&self, token: &AccessToken) -> Result<(), StoreError>;

    /// Deletes a token. Returns `false` when it did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn delete_token(&self, id: TokenId) -> Result<bool, StoreError>;

    /// Loads a principal by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn principal(&self, id: UserId) -> Result<Option<Principal>, StoreError>;

    /// Loads a principal by username.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn principal_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError>;

    /// Inserts a new principal and assigns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the username is taken.
    fn insert_principal(&self, draft: PrincipalDraft) -> Result<Principal, StoreError>;
}
