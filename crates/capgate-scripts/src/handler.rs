// crates/capgate-scripts/src/handler.rs
// ============================================================================
// Module: Script Handler Contract
// Description: Entrypoint trait, parameter declarations, and bound arguments.
// Purpose: Define the call surface every capability-script entrypoint exposes.
// Dependencies: async-trait, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A capability script resolves to one [`ScriptHandler`]. The handler declares
//! its parameters up front so the dispatcher can reject calls with missing
//! arguments before any handler code runs.
//!
//! ## Invariants
//! - A parameter without a default is required.
//! - Arguments reach the handler already bound by name; extra query keys are
//!   dropped during binding.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::environment::Environment;

// ============================================================================
// SECTION: Parameters
// ============================================================================

/// Declared entrypoint parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    /// Parameter name as it appears in the query string.
    pub name: &'static str,
    /// Default value; `None` marks the parameter as required.
    pub default: Option<&'static str>,
}

impl ParamSpec {
    /// Declares a required parameter.
    #[must_use]
    pub const fn required(name: &'static str) -> Self {
        Self {
            name,
            default: None,
        }
    }

    /// Declares an optional parameter with a default value.
    #[must_use]
    pub const fn optional(name: &'static str, default: &'static str) -> Self {
        Self {
            name,
            default: Some(default),
        }
    }

    /// Returns true when the caller must supply the parameter.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Arguments bound to declared parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptArgs {
    /// Values keyed by parameter name.
    values: BTreeMap<String, String>,
}

impl ScriptArgs {
    /// Creates bound arguments from a name/value map.
    #[must_use]
    pub const fn new(values: BTreeMap<String, String>) -> Self {
        Self {
            values,
        }
    }

    /// Returns the value bound to `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Returns the value bound to `name` or an invalid-argument error.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::InvalidArgument`] when the value is absent.
    pub fn require(&self, name: &str) -> Result<&str, HandlerError> {
        self.get(name).ok_or_else(|| HandlerError::InvalidArgument {
            name: name.to_string(),
            reason: "missing".to_string(),
        })
    }

    /// Returns the number of bound arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true when no arguments are bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the bound values.
    #[must_use]
    pub const fn as_map(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Failures raised by handler code.
///
/// The description is recorded in the invocation log and never returned to
/// the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// An argument was present but unusable.
    #[error("invalid argument {name}: {reason}")]
    InvalidArgument {
        /// Parameter name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// Handler-specific failure.
    #[error("{0}")]
    Failed(String),
}

// ============================================================================
// SECTION: Handler Trait
// ============================================================================

/// Compiled entrypoint of a capability script.
#[async_trait]
pub trait ScriptHandler: Send + Sync {
    /// Declared parameters, in declaration order.
    fn params(&self) -> &[ParamSpec];

    /// Runs the entrypoint and returns a JSON payload.
    async fn invoke(&self, args: ScriptArgs, env: &Environment) -> Result<Value, HandlerError>;
}

impl std::fmt::Debug for dyn ScriptHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHandler").field("params", &self.params()).finish_non_exhaustive()
    }
}
