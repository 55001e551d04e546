// crates/capgate-core/src/core/identifiers.rs
// ============================================================================
// Module: Capgate Identifiers
// Description: Canonical identifiers for scripts, tokens, and principals.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Script names arrive straight from request paths, so [`ScriptName::parse`]
//! rejects anything that could be interpreted as a filesystem path before the
//! name reaches the registry. Token and user identifiers are surrogate keys
//! assigned by the store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum script name length in bytes.
pub const MAX_SCRIPT_NAME_BYTES: usize = 128;

// ============================================================================
// SECTION: Script Names
// ============================================================================

/// Script name validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScriptNameError {
    /// Name is empty.
    #[error("script name is empty")]
    Empty,
    /// Name exceeds [`MAX_SCRIPT_NAME_BYTES`].
    #[error("script name exceeds {MAX_SCRIPT_NAME_BYTES} bytes")]
    TooLong,
    /// Name contains a separator or traversal sequence.
    #[error("script name contains a path separator or traversal sequence")]
    PathLike,
    /// Name contains control characters.
    #[error("script name contains control characters")]
    Control,
}

/// Unique capability script name (the unit's file stem).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptName(String);

impl ScriptName {
    /// Creates a script name without validation.
    ///
    /// Use [`ScriptName::parse`] for untrusted input.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Parses and validates an untrusted script name.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptNameError`] when the name is empty, too long, contains
    /// control characters, or contains `..`, `/`, or `\`.
    pub fn parse(value: &str) -> Result<Self, ScriptNameError> {
        if value.is_empty() {
            return Err(ScriptNameError::Empty);
        }
        if value.len() > MAX_SCRIPT_NAME_BYTES {
            return Err(ScriptNameError::TooLong);
        }
        if value.contains("..") || value.contains('/') || value.contains('\\') {
            return Err(ScriptNameError::PathLike);
        }
        if value.chars().any(char::is_control) {
            return Err(ScriptNameError::Control);
        }
        Ok(Self(value.to_string()))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ScriptName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ScriptName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Surrogate Keys
// ============================================================================

/// Access token surrogate identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(u64);

impl TokenId {
    /// Creates a token identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Principal (user) surrogate identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    /// Creates a user identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
