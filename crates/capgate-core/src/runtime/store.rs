// crates/capgate-core/src/runtime/store.rs
// ============================================================================
// Module: Capgate In-Memory Store
// Description: In-memory registry store for tests and ephemeral deployments.
// Purpose: Provide a deterministic store implementation without external deps.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! All state sits behind a single mutex, so a reconciliation is applied as one
//! swap and readers never see a half-applied plan. Plans are validated in full
//! before any record changes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::core::AccessToken;
use crate::core::CapabilityScript;
use crate::core::Principal;
use crate::core::PrincipalDraft;
use crate::core::ReconcilePlan;
use crate::core::ScriptName;
use crate::core::ScriptUpdate;
use crate::core::TokenDraft;
use crate::core::TokenId;
use crate::core::UserId;
use crate::interfaces::RegistryStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// Registry tables held in memory.
#[derive(Debug, Default)]
struct MemoryTables {
    /// Scripts by name.
    scripts: BTreeMap<ScriptName, CapabilityScript>,
    /// Tokens by identifier.
    tokens: BTreeMap<TokenId, AccessToken>,
    /// Principals by identifier.
    principals: BTreeMap<UserId, Principal>,
    /// Last assigned token identifier.
    last_token_id: u64,
    /// Last assigned user identifier.
    last_user_id: u64,
}

/// In-memory registry store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRegistryStore {
    /// Tables protected by a mutex.
    tables: Arc<Mutex<MemoryTables>>,
}

impl InMemoryRegistryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the tables.
    fn lock(&self) -> Result<MutexGuard<'_, MemoryTables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Store("registry store mutex poisoned".to_string()))
    }
}

impl RegistryStore for InMemoryRegistryStore {
    fn script(&self, name: &ScriptName) -> Result<Option<CapabilityScript>, StoreError> {
        Ok(self.lock()?.scripts.get(name).cloned())
    }

    fn scripts(&self) -> Result<Vec<CapabilityScript>, StoreError> {
        Ok(self.lock()?.scripts.values().cloned().collect())
    }

    fn apply_reconciliation(&self, plan: &ReconcilePlan) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if let Some(name) = plan.to_add.keys().find(|name| tables.scripts.contains_key(*name)) {
            return Err(StoreError::Conflict(format!("script already registered: {name}")));
        }
        if let Some(name) = plan
            .to_remove
            .iter()
            .chain(plan.to_update.keys())
            .find(|name| !tables.scripts.contains_key(*name))
        {
            return Err(StoreError::Conflict(format!("script not registered: {name}")));
        }
        for (name, path) in &plan.to_add {
            tables
                .scripts
                .insert(name.clone(), CapabilityScript::discovered(name.clone(), path.clone()));
        }
        for (name, path) in &plan.to_update {
            if let Some(script) = tables.scripts.get_mut(name) {
                script.path.clone_from(path);
            }
        }
        for name in &plan.to_remove {
            tables.scripts.remove(name);
        }
        if !plan.to_remove.is_empty() {
            for token in tables.tokens.values_mut() {
                token.accessible_scripts.retain(|name| !plan.to_remove.contains(name));
            }
            for principal in tables.principals.values_mut() {
                principal.permissions.retain(|name| !plan.to_remove.contains(name));
            }
        }
        Ok(())
    }

    fn update_script(&self, name: &ScriptName, update: &ScriptUpdate) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        let Some(script) = tables.scripts.get_mut(name) else {
            return Ok(false);
        };
        update.apply_to(script);
        Ok(true)
    }

    fn token_by_secret(&self, secret: &str) -> Result<Option<AccessToken>, StoreError> {
        Ok(self.lock()?.tokens.values().find(|token| token.secret == secret).cloned())
    }

    fn token(&self, id: TokenId) -> Result<Option<AccessToken>, StoreError> {
        Ok(self.lock()?.tokens.get(&id).cloned())
    }

    fn insert_token(&self, draft: TokenDraft, secret: String) -> Result<AccessToken, StoreError> {
        let mut tables = self.lock()?;
        if let Some(name) =
            draft.accessible_scripts.iter().find(|name| !tables.scripts.contains_key(*name))
        {
            return Err(StoreError::Invalid(format!("unknown script: {name}")));
        }
        if tables.tokens.values().any(|token| token.secret == secret) {
            return Err(StoreError::Conflict("token secret already in use".to_string()));
        }
        tables.last_token_id += 1;
        let token = draft.into_token(TokenId::new(tables.last_token_id), secret);
        tables.tokens.insert(token.id, token.clone());
        Ok(token)
    }

    fn save_token(&self, token: &AccessToken) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if let Some(name) =
            token.accessible_scripts.iter().find(|name| !tables.scripts.contains_key(*name))
        {
            return Err(StoreError::Invalid(format!("unknown script: {name}")));
        }
        let Some(existing) = tables.tokens.get_mut(&token.id) else {
            return Err(StoreError::Invalid(format!("unknown token: {}", token.id)));
        };
        *existing = token.clone();
        Ok(())
    }

    fn delete_token(&self, id: TokenId) -> Result<bool, StoreError> {
        Ok(self.lock()?.tokens.remove(&id).is_some())
    }

    fn principal(&self, id: UserId) -> Result<Option<Principal>, StoreError> {
        Ok(self.lock()?.principals.get(&id).cloned())
    }

    fn principal_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError> {
        Ok(self
            .lock()?
            .principals
            .values()
            .find(|principal| principal.username == username)
            .cloned())
    }

    fn insert_principal(&self, draft: PrincipalDraft) -> Result<Principal, StoreError> {
        let mut tables = self.lock()?;
        if tables.principals.values().any(|principal| principal.username == draft.username) {
            return Err(StoreError::Conflict(format!("username taken: {}", draft.username)));
        }
        tables.last_user_id += 1;
        let principal = draft.into_principal(UserId::new(tables.last_user_id));
        tables.principals.insert(principal.id, principal.clone());
        Ok(principal)
    }
}
