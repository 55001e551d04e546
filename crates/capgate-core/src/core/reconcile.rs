// crates/capgate-core/src/core/reconcile.rs
// ============================================================================
// Module: Registry Reconciliation Plan
// Description: Diff between discovered units and persisted script records.
// Purpose: Describe the add/remove/re-path changes applied in one transaction.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The plan is computed from two `name -> relative path` maps. An empty plan
//! means the registry already matches the plugin tree and nothing is written.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Serialize;

use crate::core::identifiers::ScriptName;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Registry changes required to match the plugin tree.
///
/// # Invariants
/// - The three sets are pairwise disjoint.
/// - `to_update` only names scripts whose stored path differs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    /// Scripts to insert, with their relative paths.
    pub to_add: BTreeMap<ScriptName, String>,
    /// Stale scripts to delete.
    pub to_remove: BTreeSet<ScriptName>,
    /// Scripts whose path must be corrected.
    pub to_update: BTreeMap<ScriptName, String>,
}

impl ReconcilePlan {
    /// Computes the plan from discovered (`fs`) and stored (`db`) mappings.
    #[must_use]
    pub fn diff(fs: &BTreeMap<ScriptName, String>, db: &BTreeMap<ScriptName, String>) -> Self {
        let mut plan = Self::default();
        for (name, path) in fs {
            match db.get(name) {
                None => {
                    plan.to_add.insert(name.clone(), path.clone());
                }
                Some(stored) if stored != path => {
                    plan.to_update.insert(name.clone(), path.clone());
                }
                Some(_) => {}
            }
        }
        for name in db.keys() {
            if !fs.contains_key(name) {
                plan.to_remove.insert(name.clone());
            }
        }
        plan
    }

    /// Returns true when no change is required.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_update.is_empty()
    }

    /// Returns the total number of changes.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.to_add.len() + self.to_remove.len() + self.to_update.len()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
