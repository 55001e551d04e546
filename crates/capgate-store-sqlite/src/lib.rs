// crates/capgate-store-sqlite/src/lib.rs
// ============================================================================
// Module: Capgate SQLite Store Library
// Description: Public surface of the SQLite registry store.
// Purpose: Re-export the store, its configuration, and its errors.
// Dependencies: crate::store
// ============================================================================

//! ## Overview
//! Durable [`capgate_core::RegistryStore`] implementation over `SQLite`.

pub mod store;

pub use store::SqliteRegistryStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
