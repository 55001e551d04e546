// crates/capgate-core/src/runtime/authz.rs
// ============================================================================
// Module: Authorization Resolver
// Description: ALLOW/DENY verdicts for script invocations.
// Purpose: Apply the ordered script/token rules and classify abuse signals.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Rules are evaluated in a fixed order and the first match wins:
//! unknown script, offline script, public script, missing bearer token,
//! unknown or inactive token, scoped token without the script, then allow.
//! [`decide`] is the pure rule table; [`AuthorizationResolver`] performs the
//! store lookups it needs and nothing more.
//!
//! Offline and missing-credential denials reveal nothing to a guesser, so
//! they never feed the abuse guard.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use crate::core::AccessToken;
use crate::core::CapabilityScript;
use crate::core::ScriptName;
use crate::interfaces::RegistryStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Reason attached to a DENY verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Script is not registered.
    NotFound,
    /// Script is registered but offline.
    Offline,
    /// No bearer token was presented.
    AuthRequired,
    /// Token is unknown or inactive.
    InvalidToken,
    /// Scoped token does not include the script.
    Forbidden,
}

impl DenyReason {
    /// Returns true when the denial should be recorded against the caller.
    ///
    /// Unknown-script lookups count; they enumerate the registry.
    #[must_use]
    pub const fn counts_as_abuse(self) -> bool {
        matches!(self, Self::NotFound | Self::InvalidToken | Self::Forbidden)
    }

    /// Returns the stable label for the reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Offline => "offline",
            Self::AuthRequired => "auth_required",
            Self::InvalidToken => "invalid_token",
            Self::Forbidden => "forbidden",
        }
    }
}

/// Context carried by an ALLOW verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// Resolved script record.
    pub script: CapabilityScript,
    /// Resolved token; absent for public scripts.
    pub token: Option<AccessToken>,
}

/// Authorization verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Invocation may proceed.
    Allow(Grant),
    /// Invocation is denied.
    Deny(DenyReason),
}

/// Outcome of the pure rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Invocation may proceed.
    Allow,
    /// Invocation is denied.
    Deny(DenyReason),
}

// ============================================================================
// SECTION: Rules
// ============================================================================

/// Applies the ordered authorization rules to already-resolved records.
///
/// `token` is the record found for `bearer`, if any. An empty bearer string
/// counts as no token.
#[must_use]
pub fn decide(
    script: Option<&CapabilityScript>,
    bearer: Option<&str>,
    token: Option<&AccessToken>,
) -> Decision {
    let Some(script) = script else {
        return Decision::Deny(DenyReason::NotFound);
    };
    if !script.is_online {
        return Decision::Deny(DenyReason::Offline);
    }
    if script.is_public {
        return Decision::Allow;
    }
    if bearer.is_none_or(str::is_empty) {
        return Decision::Deny(DenyReason::AuthRequired);
    }
    let Some(token) = token.filter(|token| token.is_active) else {
        return Decision::Deny(DenyReason::InvalidToken);
    };
    if !token.covers(&script.name) {
        return Decision::Deny(DenyReason::Forbidden);
    }
    Decision::Allow
}

// ============================================================================
// SECTION: Resolver
// ============================================================================

/// Store-backed authorization resolver.
#[derive(Clone)]
pub struct AuthorizationResolver {
    /// Registry store used for script and token lookups.
    store: Arc<dyn RegistryStore>,
}

impl AuthorizationResolver {
    /// Creates a resolver over the registry store.
    #[must_use]
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            store,
        }
    }

    /// Resolves a verdict for invoking `name` with an optional bearer token.
    ///
    /// The token is only looked up when the script is online and private.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when a registry lookup fails.
    pub fn authorize(&self, name: &ScriptName, bearer: Option<&str>) -> Result<Verdict, StoreError> {
        let script = self.store.script(name)?;
        let token = match (&script, bearer) {
            (Some(script), Some(secret))
                if script.is_online && !script.is_public && !secret.is_empty() =>
            {
                self.store.token_by_secret(secret)?
            }
            _ => None,
        };
        let decision = decide(script.as_ref(), bearer, token.as_ref());
        Ok(match (decision, script) {
            (Decision::Allow, Some(script)) => {
                let token = if script.is_public { None } else { token };
                Verdict::Allow(Grant {
                    script,
                    token,
                })
            }
            (Decision::Deny(reason), _) => Verdict::Deny(reason),
            (Decision::Allow, None) => Verdict::Deny(DenyReason::NotFound),
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
