// crates/capgate-core/src/core/model.rs
// ============================================================================
// Module: Capgate Registry Model
// Description: Capability scripts, access tokens, and principals.
// Purpose: Define the persisted fields the gateway reads and writes.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Two independent authorization layers live here. A [`Principal`]'s
//! permissions decide which scripts it may mint tokens for; an
//! [`AccessToken`]'s accessible set decides which scripts a bearer of that
//! token may invoke.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ScriptName;
use crate::core::identifiers::TokenId;
use crate::core::identifiers::UserId;

/// String configuration mapping attached to a script or a token.
pub type ConfigMap = BTreeMap<String, String>;

// ============================================================================
// SECTION: Capability Scripts
// ============================================================================

/// Registered capability script.
///
/// # Invariants
/// - `path` is relative to the plugin root and uses `/` separators.
/// - Records are created, re-pathed, and removed only by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityScript {
    /// Unique script name.
    pub name: ScriptName,
    /// Relative path of the unit manifest.
    pub path: String,
    /// Reachable without a token.
    pub is_public: bool,
    /// Accepting invocations.
    pub is_online: bool,
    /// Short description.
    pub description: Option<String>,
    /// Longer usage documentation.
    pub doc: Option<String>,
}

impl CapabilityScript {
    /// Builds a freshly discovered script record: offline and private.
    #[must_use]
    pub fn discovered(name: ScriptName, path: impl Into<String>) -> Self {
        Self {
            name,
            path: path.into(),
            is_public: false,
            is_online: false,
            description: None,
            doc: None,
        }
    }
}

/// Administrative edits to a script record. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptUpdate {
    /// New public flag.
    pub is_public: Option<bool>,
    /// New online flag.
    pub is_online: Option<bool>,
    /// New description.
    pub description: Option<String>,
    /// New documentation.
    pub doc: Option<String>,
}

impl ScriptUpdate {
    /// Applies the update to a script record.
    pub fn apply_to(&self, script: &mut CapabilityScript) {
        if let Some(is_public) = self.is_public {
            script.is_public = is_public;
        }
        if let Some(is_online) = self.is_online {
            script.is_online = is_online;
        }
        if let Some(description) = &self.description {
            script.description = Some(description.clone());
        }
        if let Some(doc) = &self.doc {
            script.doc = Some(doc.clone());
        }
    }
}

// ============================================================================
// SECTION: Access Tokens
// ============================================================================

/// Access token kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Grants every registered, online script.
    Universal,
    /// Grants only the scripts in the token's accessible set.
    Scoped,
}

impl TokenKind {
    /// Returns the stable label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Universal => "universal",
            Self::Scoped => "scoped",
        }
    }

    /// Parses a stable label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "universal" => Some(Self::Universal),
            "scoped" => Some(Self::Scoped),
            _ => None,
        }
    }
}

/// Bearer credential presented to the invocation endpoint.
///
/// # Invariants
/// - `accessible_scripts` is only consulted when `kind` is [`TokenKind::Scoped`].
/// - `secret` is never written to logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// Surrogate identifier.
    pub id: TokenId,
    /// Opaque secret value.
    pub secret: String,
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Principal that minted the token.
    pub creator: UserId,
    /// Active flag.
    pub is_active: bool,
    /// Token kind.
    pub kind: TokenKind,
    /// Scripts reachable with a scoped token.
    pub accessible_scripts: BTreeSet<ScriptName>,
    /// Token-attached configuration mapping.
    pub config: ConfigMap,
}

impl AccessToken {
    /// Returns true when the token's scope covers the script.
    #[must_use]
    pub fn covers(&self, script: &ScriptName) -> bool {
        match self.kind {
            TokenKind::Universal => true,
            TokenKind::Scoped => self.accessible_scripts.contains(script),
        }
    }
}

/// Token fields supplied at mint time; the store assigns the identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDraft {
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Minting principal.
    pub creator: UserId,
    /// Token kind.
    pub kind: TokenKind,
    /// Scripts reachable with a scoped token.
    pub accessible_scripts: BTreeSet<ScriptName>,
    /// Token-attached configuration mapping.
    pub config: ConfigMap,
}

impl TokenDraft {
    /// Materializes the draft into a token record.
    #[must_use]
    pub fn into_token(self, id: TokenId, secret: String) -> AccessToken {
        AccessToken {
            id,
            secret,
            name: self.name,
            description: self.description,
            creator: self.creator,
            is_active: true,
            kind: self.kind,
            accessible_scripts: self.accessible_scripts,
            config: self.config,
        }
    }
}

// ============================================================================
// SECTION: Principals
// ============================================================================

/// Principal role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Administrator.
    Admin,
    /// Regular user.
    User,
}

impl Role {
    /// Returns the stable label for the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }

    /// Parses a stable label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "admin" => Some(Self::Admin),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

/// Session-derived caller identity that mints and manages tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Surrogate identifier.
    pub id: UserId,
    /// Unique username.
    pub username: String,
    /// Role.
    pub role: Role,
    /// Active flag.
    pub is_active: bool,
    /// Implicit permission over every script when minting tokens.
    pub all_access: bool,
    /// Explicit per-script minting permissions.
    pub permissions: BTreeSet<ScriptName>,
}

impl Principal {
    /// Returns true for administrators.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Returns true when the principal may grant the script to a token.
    #[must_use]
    pub fn may_grant(&self, script: &ScriptName) -> bool {
        self.is_admin() || self.all_access || self.permissions.contains(script)
    }
}

/// Principal fields supplied at creation; the store assigns the identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalDraft {
    /// Unique username.
    pub username: String,
    /// Role.
    pub role: Role,
    /// Implicit permission over every script.
    pub all_access: bool,
    /// Explicit per-script permissions.
    pub permissions: BTreeSet<ScriptName>,
}

impl PrincipalDraft {
    /// Materializes the draft into an active principal record.
    #[must_use]
    pub fn into_principal(self, id: UserId) -> Principal {
        Principal {
            id,
            username: self.username,
            role: self.role,
            is_active: true,
            all_access: self.all_access,
            permissions: self.permissions,
        }
    }
}
