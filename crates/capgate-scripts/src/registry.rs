// crates/capgate-scripts/src/registry.rs
// ============================================================================
// Module: Script Registry
// Description: Reconciles discovered units with persisted script records.
// Purpose: Keep the registry in step with the plugin tree in one transaction.
// Dependencies: capgate-core, thiserror
// ============================================================================

//! ## Overview
//! Reconciliation compares the discovered `{name -> path}` set against the
//! stored one and applies the resulting [`ReconcilePlan`] through
//! [`RegistryStore::apply_reconciliation`]. An empty plan is never applied,
//! so a second run over an unchanged tree performs no writes.
//!
//! ## Invariants
//! - Either every change of a plan is committed or none is.
//! - Newly added scripts are offline and private.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use capgate_core::ReconcilePlan;
use capgate_core::RegistryStore;
use capgate_core::ScriptName;
use capgate_core::StoreError;
use thiserror::Error;

use crate::discovery::SkippedUnit;
use crate::discovery::discover;
use crate::loader::ScriptError;
use crate::loader::ScriptLoader;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Reconciliation failures, tagged with the failing step.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Scanning the plugin tree failed.
    #[error("reconcile scan failed: {0}")]
    Scan(#[source] ScriptError),
    /// Reading stored scripts failed.
    #[error("reconcile load failed: {0}")]
    Load(#[source] StoreError),
    /// Applying the plan failed; nothing was committed.
    #[error("reconcile apply failed: {0}")]
    Apply(#[source] StoreError),
}

impl RegistryError {
    /// Returns the failing step label.
    #[must_use]
    pub const fn step(&self) -> &'static str {
        match self {
            Self::Scan(_) => "scan",
            Self::Load(_) => "load",
            Self::Apply(_) => "apply",
        }
    }
}

// ============================================================================
// SECTION: Report
// ============================================================================

/// Outcome of a reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Scripts inserted.
    pub added: Vec<ScriptName>,
    /// Scripts deleted.
    pub removed: Vec<ScriptName>,
    /// Scripts whose path was corrected.
    pub updated: Vec<ScriptName>,
    /// Units found on disk but not registered.
    pub skipped: Vec<SkippedUnit>,
}

impl ReconcileReport {
    /// Returns true when no registry change was made.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Plugin tree bound to a registry store.
#[derive(Clone)]
pub struct ScriptRegistry {
    /// Unit loader for the plugin root.
    loader: ScriptLoader,
    /// Persisted registry.
    store: Arc<dyn RegistryStore>,
}

impl ScriptRegistry {
    /// Creates a registry.
    #[must_use]
    pub fn new(loader: ScriptLoader, store: Arc<dyn RegistryStore>) -> Self {
        Self {
            loader,
            store,
        }
    }

    /// Returns the unit loader.
    #[must_use]
    pub const fn loader(&self) -> &ScriptLoader {
        &self.loader
    }

    /// Computes the plan for the current tree without applying it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when scanning or reading the store fails.
    pub fn plan(&self) -> Result<(ReconcilePlan, Vec<SkippedUnit>), RegistryError> {
        let discovery = discover(&self.loader).map_err(RegistryError::Scan)?;
        let stored = self.store.script_paths().map_err(RegistryError::Load)?;
        Ok((ReconcilePlan::diff(&discovery.units, &stored), discovery.skipped))
    }

    /// Reconciles the plugin tree with the store.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] naming the failing step. On error no change
    /// has been committed and the call may be retried.
    pub fn reconcile(&self) -> Result<ReconcileReport, RegistryError> {
        let (plan, skipped) = self.plan()?;
        if !plan.is_empty() {
            self.store.apply_reconciliation(&plan).map_err(RegistryError::Apply)?;
        }
        Ok(ReconcileReport {
            added: plan.to_add.into_keys().collect(),
            removed: plan.to_remove.into_iter().collect(),
            updated: plan.to_update.into_keys().collect(),
            skipped,
        })
    }
}
