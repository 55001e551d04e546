// crates/capgate-scripts/src/lib.rs
// ============================================================================
// Module: Capgate Scripts Library
// Description: Capability-script contract and registry reconciliation.
// Purpose: Turn a plugin tree into registered, callable entrypoints.
// Dependencies: capgate-core, async-trait, tokio, toml, walkdir
// ============================================================================

//! ## Overview
//! A capability script is a TOML unit manifest whose single entrypoint export
//! names a handler compiled into the host's [`HandlerCatalog`]. This crate
//! discovers units, loads them in isolation, binds query arguments to
//! declared parameters, and carries the per-invocation [`Environment`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod binding;
pub mod catalog;
pub mod discovery;
pub mod environment;
pub mod handler;
pub mod loader;
pub mod manifest;
pub mod registry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use binding::MissingArguments;
pub use binding::bind_arguments;
pub use catalog::CatalogError;
pub use catalog::HandlerCatalog;
pub use discovery::Discovery;
pub use discovery::SkipReason;
pub use discovery::SkipSeverity;
pub use discovery::SkippedUnit;
pub use discovery::discover;
pub use environment::Environment;
pub use environment::RequestDescriptor;
pub use handler::HandlerError;
pub use handler::ParamSpec;
pub use handler::ScriptArgs;
pub use handler::ScriptHandler;
pub use loader::Entrypoint;
pub use loader::LoadedUnit;
pub use loader::ScriptError;
pub use loader::ScriptLoader;
pub use manifest::ExportSpec;
pub use manifest::RESERVED_UNIT;
pub use manifest::UnitManifest;
pub use registry::ReconcileReport;
pub use registry::RegistryError;
pub use registry::ScriptRegistry;
