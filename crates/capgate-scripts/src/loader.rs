// crates/capgate-scripts/src/loader.rs
// ============================================================================
// Module: Unit Loader
// Description: Reads a unit manifest and resolves its entrypoint handler.
// Purpose: Load one unit in isolation from a path relative to the plugin root.
// Dependencies: capgate-core, thiserror, toml
// ============================================================================

//! ## Overview
//! Loading is the point where a registered path becomes callable code:
//! read the manifest, find the single entrypoint, and resolve its handler key
//! in the [`HandlerCatalog`].
//!
//! ## Invariants
//! - Relative paths are confined to the plugin root: absolute paths and `..`
//!   components are rejected before touching the filesystem.
//! - Manifests larger than [`MAX_MANIFEST_BYTES`] are rejected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use capgate_core::ConfigMap;
use thiserror::Error;

use crate::catalog::HandlerCatalog;
use crate::handler::ScriptHandler;
use crate::manifest::EntrypointIssue;
use crate::manifest::MAX_MANIFEST_BYTES;
use crate::manifest::UNIT_EXTENSION;
use crate::manifest::UnitManifest;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Unit loading failures.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Unit file does not exist.
    #[error("unit not found: {0}")]
    Missing(String),
    /// Path escapes the plugin root or is not a manifest.
    #[error("invalid unit path: {0}")]
    InvalidPath(String),
    /// Unit file could not be read.
    #[error("unit io error at {path}: {message}")]
    Io {
        /// Relative unit path.
        path: String,
        /// Underlying error.
        message: String,
    },
    /// Unit file exceeds the size limit.
    #[error("unit exceeds {MAX_MANIFEST_BYTES} bytes: {0}")]
    TooLarge(String),
    /// Unit manifest is malformed.
    #[error("unit parse error at {path}: {message}")]
    Parse {
        /// Relative unit path.
        path: String,
        /// Parser message.
        message: String,
    },
    /// No export is designated as the entrypoint.
    #[error("unit declares no entrypoint: {0}")]
    NoEntrypoint(String),
    /// Several exports are designated as the entrypoint.
    #[error("unit declares {count} entrypoints: {path}")]
    MultipleEntrypoints {
        /// Relative unit path.
        path: String,
        /// Number of designated exports.
        count: usize,
    },
    /// Entrypoint handler key is not in the catalog.
    #[error("unit {path} names unknown handler {handler}")]
    UnresolvedHandler {
        /// Relative unit path.
        path: String,
        /// Handler key.
        handler: String,
    },
}

// ============================================================================
// SECTION: Loaded Units
// ============================================================================

/// Callable entrypoint of a loaded unit.
#[derive(Clone)]
pub struct Entrypoint {
    /// Exported function name.
    pub function: String,
    /// Catalog key the function resolved through.
    pub handler_key: String,
    /// Resolved handler.
    pub handler: Arc<dyn ScriptHandler>,
}

impl std::fmt::Debug for Entrypoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entrypoint")
            .field("function", &self.function)
            .field("handler_key", &self.handler_key)
            .finish_non_exhaustive()
    }
}

/// Unit loaded in isolation.
#[derive(Debug, Clone)]
pub struct LoadedUnit {
    /// Path relative to the plugin root.
    pub path: String,
    /// Unit description.
    pub description: Option<String>,
    /// Unit documentation.
    pub doc: Option<String>,
    /// Script-attached configuration.
    pub config: ConfigMap,
    /// Designated entrypoint.
    pub entrypoint: Entrypoint,
}

// ============================================================================
// SECTION: Loader
// ============================================================================

/// Loads units from a plugin root against a handler catalog.
#[derive(Debug, Clone)]
pub struct ScriptLoader {
    /// Plugin root directory.
    root: PathBuf,
    /// Compiled handler table.
    catalog: Arc<HandlerCatalog>,
}

impl ScriptLoader {
    /// Creates a loader rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, catalog: Arc<HandlerCatalog>) -> Self {
        Self {
            root: root.into(),
            catalog,
        }
    }

    /// Returns the plugin root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the handler catalog.
    #[must_use]
    pub fn catalog(&self) -> &HandlerCatalog {
        &self.catalog
    }

    /// Loads the unit stored at `relative` under the plugin root.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError`] when the path is invalid, the file is missing or
    /// unreadable, the manifest is malformed, or the entrypoint cannot be
    /// resolved.
    pub fn load(&self, relative: &str) -> Result<LoadedUnit, ScriptError> {
        let full = self.resolve(relative)?;
        let bytes = match fs::read(&full) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ScriptError::Missing(relative.to_string()));
            }
            Err(err) => {
                return Err(ScriptError::Io {
                    path: relative.to_string(),
                    message: err.to_string(),
                });
            }
        };
        if bytes.len() > MAX_MANIFEST_BYTES {
            return Err(ScriptError::TooLarge(relative.to_string()));
        }
        let text = String::from_utf8(bytes).map_err(|_| ScriptError::Parse {
            path: relative.to_string(),
            message: "manifest must be utf-8".to_string(),
        })?;
        let manifest = UnitManifest::parse(&text).map_err(|err| ScriptError::Parse {
            path: relative.to_string(),
            message: err.to_string(),
        })?;
        let export = manifest.entrypoint().map_err(|issue| match issue {
            EntrypointIssue::Missing => ScriptError::NoEntrypoint(relative.to_string()),
            EntrypointIssue::Ambiguous(count) => ScriptError::MultipleEntrypoints {
                path: relative.to_string(),
                count,
            },
        })?;
        let handler =
            self.catalog.get(&export.handler).ok_or_else(|| ScriptError::UnresolvedHandler {
                path: relative.to_string(),
                handler: export.handler.clone(),
            })?;
        let entrypoint = Entrypoint {
            function: export.function.clone(),
            handler_key: export.handler.clone(),
            handler,
        };
        Ok(LoadedUnit {
            path: relative.to_string(),
            description: manifest.description,
            doc: manifest.doc,
            config: manifest.config,
            entrypoint,
        })
    }

    /// Joins a relative unit path onto the root after validating it.
    fn resolve(&self, relative: &str) -> Result<PathBuf, ScriptError> {
        let path = Path::new(relative);
        let confined = !relative.is_empty()
            && path.components().all(|component| matches!(component, Component::Normal(_)));
        let is_manifest = path.extension().and_then(|ext| ext.to_str()) == Some(UNIT_EXTENSION);
        if !confined || !is_manifest {
            return Err(ScriptError::InvalidPath(relative.to_string()));
        }
        Ok(self.root.join(path))
    }
}
