// crates/capgate-scripts/src/manifest.rs
// ============================================================================
// Module: Unit Manifest
// Description: TOML description of a capability-script unit.
// Purpose: Parse unit metadata and locate the single designated entrypoint.
// Dependencies: capgate-core, serde, toml
// ============================================================================

//! ## Overview
//! A unit manifest looks like:
//!
//! ```toml
//! description = "Greets a caller"
//!
//! [config]
//! locale = "fr"
//!
//! [[exports]]
//! function = "greet"
//! handler = "salutation.greet"
//! entrypoint = true
//! ```
//!
//! Exports without `entrypoint = true` are metadata only and never callable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use capgate_core::ConfigMap;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Manifest file extension.
pub const UNIT_EXTENSION: &str = "toml";
/// Reserved shared-support unit, never registered as a script.
pub const RESERVED_UNIT: &str = "core.toml";
/// Maximum manifest size in bytes.
pub const MAX_MANIFEST_BYTES: usize = 256 * 1024;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Parsed unit manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitManifest {
    /// Short description.
    #[serde(default)]
    pub description: Option<String>,
    /// Long-form documentation.
    #[serde(default)]
    pub doc: Option<String>,
    /// Script-attached configuration mapping.
    #[serde(default)]
    pub config: ConfigMap,
    /// Exported functions.
    #[serde(default)]
    pub exports: Vec<ExportSpec>,
}

/// One exported function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportSpec {
    /// Function name within the unit.
    pub function: String,
    /// Handler catalog key implementing the function.
    pub handler: String,
    /// Entrypoint designation.
    #[serde(default)]
    pub entrypoint: bool,
}

/// Entrypoint lookup outcome when the manifest is not callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrypointIssue {
    /// No export is designated.
    Missing,
    /// More than one export is designated.
    Ambiguous(usize),
}

impl UnitManifest {
    /// Parses manifest text.
    ///
    /// # Errors
    ///
    /// Returns [`toml::de::Error`] when the text is not a valid manifest.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Returns the single designated entrypoint.
    ///
    /// # Errors
    ///
    /// Returns [`EntrypointIssue`] when zero or several exports are designated.
    pub fn entrypoint(&self) -> Result<&ExportSpec, EntrypointIssue> {
        let mut designated = self.exports.iter().filter(|export| export.entrypoint);
        match (designated.next(), designated.next()) {
            (Some(export), None) => Ok(export),
            (None, _) => Err(EntrypointIssue::Missing),
            (Some(_), Some(_)) => Err(EntrypointIssue::Ambiguous(
                self.exports.iter().filter(|export| export.entrypoint).count(),
            )),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only manifest fixtures.")]
mod tests {
    use super::*;

    #[test]
    fn parses_full_manifest() {
        let manifest = UnitManifest::parse(
            r#"
description = "Greets a caller"
doc = "Returns a French greeting."

[config]
locale = "fr"

[[exports]]
function = "helper"
handler = "salutation.helper"

[[exports]]
function = "greet"
handler = "salutation.greet"
entrypoint = true
"#,
        )
        .unwrap();
        assert_eq!(manifest.description.as_deref(), Some("Greets a caller"));
        assert_eq!(manifest.config.get("locale").map(String::as_str), Some("fr"));
        assert_eq!(manifest.entrypoint().unwrap().handler, "salutation.greet");
    }

    #[test]
    fn entrypoint_must_be_unique() {
        let none = UnitManifest::parse("[[exports]]\nfunction = \"a\"\nhandler = \"x\"\n").unwrap();
        assert_eq!(none.entrypoint(), Err(EntrypointIssue::Missing));

        let two = UnitManifest::parse(
            "[[exports]]\nfunction = \"a\"\nhandler = \"x\"\nentrypoint = true\n\n\
             [[exports]]\nfunction = \"b\"\nhandler = \"y\"\nentrypoint = true\n",
        )
        .unwrap();
        assert_eq!(two.entrypoint(), Err(EntrypointIssue::Ambiguous(2)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(UnitManifest::parse("runtime = \"python\"\n").is_err());
    }
}
