// crates/capgate-core/src/runtime/tokens.rs
// ============================================================================
// Module: Token Administration
// Description: Minting and lifecycle rules for access tokens.
// Purpose: Enforce who may create, rescope, toggle, and delete tokens.
// Dependencies: crate::{core, interfaces}, rand, thiserror
// ============================================================================

//! ## Overview
//! Token administration is governed by the minting principal, not by any
//! token. Rules:
//! - inactive principals cannot mint;
//! - universal tokens are reserved to administrators;
//! - scoped tokens need at least one registered script;
//! - without all-access, a non-admin principal may only grant scripts from
//!   its own permission set;
//! - only the creator or an administrator may change or delete a token.
//!
//! Deleting a token never touches its creator.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

use crate::core::AccessToken;
use crate::core::ConfigMap;
use crate::core::Principal;
use crate::core::ScriptName;
use crate::core::TokenDraft;
use crate::core::TokenId;
use crate::core::TokenKind;
use crate::core::hex_encode;
use crate::interfaces::RegistryStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Random bytes per token secret.
const SECRET_BYTES: usize = 32;
/// Maximum token name length in bytes.
const MAX_TOKEN_NAME_BYTES: usize = 128;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Token administration failures.
#[derive(Debug, Error)]
pub enum TokenPolicyError {
    /// Acting principal is inactive.
    #[error("principal is inactive")]
    InactivePrincipal,
    /// Universal tokens require an administrator.
    #[error("only administrators may mint universal tokens")]
    UniversalRequiresAdmin,
    /// Scoped token without scripts.
    #[error("scoped tokens require at least one script")]
    EmptyScope,
    /// Requested scripts are not registered.
    #[error("unknown scripts: {0}")]
    UnknownScripts(String),
    /// Principal lacks permission over requested scripts.
    #[error("principal may not grant access to: {0}")]
    ScriptsNotPermitted(String),
    /// Token name is empty or too long.
    #[error("token name must be 1-{MAX_TOKEN_NAME_BYTES} bytes")]
    InvalidName,
    /// Token does not exist.
    #[error("token not found: {0}")]
    TokenNotFound(TokenId),
    /// Principal is neither the creator nor an administrator.
    #[error("only the token creator or an administrator may modify token {0}")]
    NotOwner(TokenId),
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Parameters for minting a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintRequest {
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Token kind.
    pub kind: TokenKind,
    /// Scripts for a scoped token; ignored for universal tokens.
    pub scripts: BTreeSet<ScriptName>,
    /// Token-attached configuration mapping.
    pub config: ConfigMap,
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Checks whether `principal` may mint or rescope a token to `kind`/`scripts`.
///
/// # Errors
///
/// Returns [`TokenPolicyError`] describing the first violated rule.
pub fn check_scope(
    principal: &Principal,
    kind: TokenKind,
    scripts: &BTreeSet<ScriptName>,
    registered: &BTreeSet<ScriptName>,
) -> Result<(), TokenPolicyError> {
    if !principal.is_active {
        return Err(TokenPolicyError::InactivePrincipal);
    }
    match kind {
        TokenKind::Universal => {
            if principal.is_admin() {
                Ok(())
            } else {
                Err(TokenPolicyError::UniversalRequiresAdmin)
            }
        }
        TokenKind::Scoped => {
            if scripts.is_empty() {
                return Err(TokenPolicyError::EmptyScope);
            }
            let unknown: Vec<&str> = scripts
                .iter()
                .filter(|name| !registered.contains(*name))
                .map(ScriptName::as_str)
                .collect();
            if !unknown.is_empty() {
                return Err(TokenPolicyError::UnknownScripts(unknown.join(", ")));
            }
            let denied: Vec<&str> = scripts
                .iter()
                .filter(|name| !principal.may_grant(name))
                .map(ScriptName::as_str)
                .collect();
            if denied.is_empty() {
                Ok(())
            } else {
                Err(TokenPolicyError::ScriptsNotPermitted(denied.join(", ")))
            }
        }
    }
}

/// Checks whether `principal` may modify or delete `token`.
///
/// # Errors
///
/// Returns [`TokenPolicyError`] when the principal is inactive or not an owner.
pub fn check_manage(principal: &Principal, token: &AccessToken) -> Result<(), TokenPolicyError> {
    if !principal.is_active {
        return Err(TokenPolicyError::InactivePrincipal);
    }
    if principal.is_admin() || principal.id == token.creator {
        Ok(())
    } else {
        Err(TokenPolicyError::NotOwner(token.id))
    }
}

/// Generates a fresh hex-encoded token secret.
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0_u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

/// Validates a token name.
fn check_name(name: &str) -> Result<(), TokenPolicyError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_TOKEN_NAME_BYTES {
        return Err(TokenPolicyError::InvalidName);
    }
    Ok(())
}

// ============================================================================
// SECTION: Service
// ============================================================================

/// Store-backed token administration service.
#[derive(Clone)]
pub struct TokenAdmin {
    /// Registry store.
    store: Arc<dyn RegistryStore>,
}

impl TokenAdmin {
    /// Creates the service over the registry store.
    #[must_use]
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            store,
        }
    }

    /// Mints a token on behalf of `principal`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenPolicyError`] when a rule is violated or the store fails.
    pub fn mint(
        &self,
        principal: &Principal,
        request: MintRequest,
    ) -> Result<AccessToken, TokenPolicyError> {
        check_name(&request.name)?;
        let scripts = scoped_set(request.kind, request.scripts);
        check_scope(principal, request.kind, &scripts, &self.registered()?)?;
        let draft = TokenDraft {
            name: request.name.trim().to_string(),
            description: request.description,
            creator: principal.id,
            kind: request.kind,
            accessible_scripts: scripts,
            config: request.config,
        };
        Ok(self.store.insert_token(draft, generate_secret())?)
    }

    /// Renames a token and replaces its description.
    ///
    /// # Errors
    ///
    /// Returns [`TokenPolicyError`] when a rule is violated or the store fails.
    pub fn rename(
        &self,
        principal: &Principal,
        id: TokenId,
        name: &str,
        description: Option<String>,
    ) -> Result<AccessToken, TokenPolicyError> {
        check_name(name)?;
        self.modify(principal, id, |token| {
            token.name = name.trim().to_string();
            token.description = description;
            Ok(())
        })
    }

    /// Changes a token's kind and accessible scripts.
    ///
    /// # Errors
    ///
    /// Returns [`TokenPolicyError`] when a rule is violated or the store fails.
    pub fn rescope(
        &self,
        principal: &Principal,
        id: TokenId,
        kind: TokenKind,
        scripts: BTreeSet<ScriptName>,
    ) -> Result<AccessToken, TokenPolicyError> {
        let scripts = scoped_set(kind, scripts);
        let registered = self.registered()?;
        self.modify(principal, id, |token| {
            check_scope(principal, kind, &scripts, &registered)?;
            token.kind = kind;
            token.accessible_scripts = scripts;
            Ok(())
        })
    }

    /// Activates or deactivates a token.
    ///
    /// # Errors
    ///
    /// Returns [`TokenPolicyError`] when a rule is violated or the store fails.
    pub fn set_active(
        &self,
        principal: &Principal,
        id: TokenId,
        active: bool,
    ) -> Result<AccessToken, TokenPolicyError> {
        self.modify(principal, id, |token| {
            token.is_active = active;
            Ok(())
        })
    }

    /// Deletes a token.
    ///
    /// # Errors
    ///
    /// Returns [`TokenPolicyError`] when a rule is violated or the store fails.
    pub fn delete(&self, principal: &Principal, id: TokenId) -> Result<(), TokenPolicyError> {
        let token = self.store.token(id)?.ok_or(TokenPolicyError::TokenNotFound(id))?;
        check_manage(principal, &token)?;
        if self.store.delete_token(id)? {
            Ok(())
        } else {
            Err(TokenPolicyError::TokenNotFound(id))
        }
    }

    /// Loads, authorizes, edits, and saves a token.
    fn modify(
        &self,
        principal: &Principal,
        id: TokenId,
        edit: impl FnOnce(&mut AccessToken) -> Result<(), TokenPolicyError>,
    ) -> Result<AccessToken, TokenPolicyError> {
        let mut token = self.store.token(id)?.ok_or(TokenPolicyError::TokenNotFound(id))?;
        check_manage(principal, &token)?;
        edit(&mut token)?;
        self.store.save_token(&token)?;
        Ok(token)
    }

    /// Returns the set of registered script names.
    fn registered(&self) -> Result<BTreeSet<ScriptName>, TokenPolicyError> {
        Ok(self.store.script_paths()?.into_keys().collect())
    }
}

/// Drops the script set for universal tokens.
fn scoped_set(kind: TokenKind, scripts: BTreeSet<ScriptName>) -> BTreeSet<ScriptName> {
    match kind {
        TokenKind::Universal => BTreeSet::new(),
        TokenKind::Scoped => scripts,
    }
}
