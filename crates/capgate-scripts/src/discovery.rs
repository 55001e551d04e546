// crates/capgate-scripts/src/discovery.rs
// ============================================================================
// Module: Unit Discovery
// Description: Recursive scan of the plugin tree for callable units.
// Purpose: Build the filesystem side of registry reconciliation.
// Dependencies: capgate-core, walkdir
// ============================================================================

//! ## Overview
//! Discovery walks the plugin root, loads every manifest in isolation, and
//! keeps the units that resolve to exactly one entrypoint. Everything else is
//! reported as a [`SkippedUnit`] with a severity so the caller can log it.
//!
//! ## Invariants
//! - Candidates are processed in sorted relative-path order, so the first
//!   unit claiming a name wins deterministically.
//! - Hidden entries and the reserved `core.toml` unit are never candidates.
//! - Recorded paths use `/` separators regardless of platform.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use capgate_core::ScriptName;
use walkdir::WalkDir;

use crate::loader::ScriptError;
use crate::loader::ScriptLoader;
use crate::manifest::RESERVED_UNIT;
use crate::manifest::UNIT_EXTENSION;

// ============================================================================
// SECTION: Types
// ============================================================================

/// How loudly a skipped unit should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SkipSeverity {
    /// Expected; the unit simply is not a script.
    Info,
    /// Suspicious; the unit looks like a script but is ambiguous.
    Warn,
    /// The unit is broken.
    Error,
}

impl SkipSeverity {
    /// Returns the stable label for the severity.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Why a unit was not registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No export is designated as the entrypoint.
    NoEntrypoint,
    /// Several exports are designated as the entrypoint.
    MultipleEntrypoints(usize),
    /// The file stem is not a valid script name.
    InvalidName(String),
    /// Another unit already claimed the name.
    Duplicate {
        /// Path of the unit that kept the name.
        kept: String,
    },
    /// The unit could not be loaded.
    Unloadable(String),
}

impl SkipReason {
    /// Returns the reporting severity.
    #[must_use]
    pub const fn severity(&self) -> SkipSeverity {
        match self {
            Self::NoEntrypoint => SkipSeverity::Info,
            Self::MultipleEntrypoints(_) | Self::Duplicate {
                ..
            } => SkipSeverity::Warn,
            Self::InvalidName(_) | Self::Unloadable(_) => SkipSeverity::Error,
        }
    }

    /// Returns a human-readable description.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::NoEntrypoint => "no entrypoint declared".to_string(),
            Self::MultipleEntrypoints(count) => format!("{count} entrypoints declared"),
            Self::InvalidName(reason) => format!("invalid script name: {reason}"),
            Self::Duplicate {
                kept,
            } => format!("name already provided by {kept}"),
            Self::Unloadable(reason) => reason.clone(),
        }
    }
}

/// Unit found on disk but not registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedUnit {
    /// Path relative to the plugin root.
    pub path: String,
    /// Skip reason.
    pub reason: SkipReason,
}

/// Result of scanning the plugin tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Callable units by script name.
    pub units: BTreeMap<ScriptName, String>,
    /// Units left out, in scan order.
    pub skipped: Vec<SkippedUnit>,
}

// ============================================================================
// SECTION: Scan
// ============================================================================

/// Scans the loader's plugin root.
///
/// # Errors
///
/// Returns [`ScriptError::Io`] when the root itself cannot be read. Problems
/// with individual units are reported through [`Discovery::skipped`].
pub fn discover(loader: &ScriptLoader) -> Result<Discovery, ScriptError> {
    let root = loader.root();
    if !root.is_dir() {
        return Err(ScriptError::Io {
            path: root.display().to_string(),
            message: "plugin root is not a directory".to_string(),
        });
    }
    let mut discovery = Discovery::default();
    for relative in candidate_paths(root, &mut discovery.skipped) {
        let stem = Path::new(&relative)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
        let name = match ScriptName::parse(&stem) {
            Ok(name) => name,
            Err(err) => {
                discovery.skipped.push(SkippedUnit {
                    path: relative,
                    reason: SkipReason::InvalidName(err.to_string()),
                });
                continue;
            }
        };
        if let Some(kept) = discovery.units.get(&name) {
            let reason = SkipReason::Duplicate {
                kept: kept.clone(),
            };
            discovery.skipped.push(SkippedUnit {
                path: relative,
                reason,
            });
            continue;
        }
        match loader.load(&relative) {
            Ok(_) => {
                discovery.units.insert(name, relative);
            }
            Err(err) => {
                let reason = match err {
                    ScriptError::NoEntrypoint(_) => SkipReason::NoEntrypoint,
                    ScriptError::MultipleEntrypoints {
                        count, ..
                    } => SkipReason::MultipleEntrypoints(count),
                    other => SkipReason::Unloadable(other.to_string()),
                };
                discovery.skipped.push(SkippedUnit {
                    path: relative,
                    reason,
                });
            }
        }
    }
    Ok(discovery)
}

/// Collects sorted candidate manifest paths relative to `root`.
fn candidate_paths(root: &Path, skipped: &mut Vec<SkippedUnit>) -> Vec<String> {
    let mut paths = Vec::new();
    let walker = WalkDir::new(root).follow_links(false).into_iter().filter_entry(|entry| {
        entry.depth() == 0 || entry.file_name().to_str().is_none_or(|name| !name.starts_with('.'))
    });
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .and_then(|path| path.strip_prefix(root).ok())
                    .map_or_else(String::new, to_slash_path);
                skipped.push(SkippedUnit {
                    path,
                    reason: SkipReason::Unloadable(err.to_string()),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(UNIT_EXTENSION) {
            continue;
        }
        if entry.file_name().to_str() == Some(RESERVED_UNIT) {
            continue;
        }
        if let Ok(relative) = path.strip_prefix(root) {
            paths.push(to_slash_path(relative));
        }
    }
    paths.sort();
    paths
}

/// Renders a relative path with `/` separators.
fn to_slash_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
