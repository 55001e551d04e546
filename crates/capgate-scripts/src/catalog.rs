// crates/capgate-scripts/src/catalog.rs
// ============================================================================
// Module: Handler Catalog
// Description: Compiled table of handler keys to entrypoint implementations.
// Purpose: Resolve manifest handler keys without loading code at request time.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! The catalog is assembled once by the host binary and shared read-only.
//! Unit manifests name a key; a key absent from the catalog makes the unit
//! unloadable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::handler::ScriptHandler;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Catalog registration failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Key is already registered.
    #[error("handler already registered: {0}")]
    Duplicate(String),
    /// Key is empty.
    #[error("handler key must be non-empty")]
    EmptyKey,
}

// ============================================================================
// SECTION: Catalog
// ============================================================================

/// Name-to-handler table.
#[derive(Debug, Clone, Default)]
pub struct HandlerCatalog {
    /// Handlers by key.
    handlers: BTreeMap<String, Arc<dyn ScriptHandler>>,
}

impl HandlerCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the key is empty or already taken.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        handler: Arc<dyn ScriptHandler>,
    ) -> Result<(), CatalogError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(CatalogError::EmptyKey);
        }
        if self.handlers.contains_key(&key) {
            return Err(CatalogError::Duplicate(key));
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    /// Returns the handler registered under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<dyn ScriptHandler>> {
        self.handlers.get(key).cloned()
    }

    /// Returns registered keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Returns the number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true when no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
