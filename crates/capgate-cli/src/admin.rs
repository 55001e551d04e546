// crates/capgate-cli/src/admin.rs
// ============================================================================
// Module: Registry Administration
// Description: Principal, token, and script administration over the store.
// Purpose: Back the `user`, `token`, and `script` CLI subcommands.
// Dependencies: capgate-core, capgate-config, capgate-gateway, thiserror
// ============================================================================

//! ## Overview
//! Administrative writes go straight to the configured registry store. They
//! require a durable store: changes made against the in-memory store would be
//! lost when the command exits. Token minting goes through [`TokenAdmin`] so
//! the same scope rules apply as anywhere else.

use std::collections::BTreeSet;
use std::sync::Arc;

use capgate_config::CapgateConfig;
use capgate_config::StoreType;
use capgate_core::AccessToken;
use capgate_core::CapabilityScript;
use capgate_core::ConfigMap;
use capgate_core::MintRequest;
use capgate_core::Principal;
use capgate_core::PrincipalDraft;
use capgate_core::RegistryStore;
use capgate_core::Role;
use capgate_core::ScriptName;
use capgate_core::ScriptNameError;
use capgate_core::ScriptUpdate;
use capgate_core::StoreError;
use capgate_core::TokenAdmin;
use capgate_core::TokenKind;
use capgate_core::TokenPolicyError;
use capgate_gateway::build_store;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum username length in bytes.
const MAX_USERNAME_BYTES: usize = 64;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Administration failures.
#[derive(Debug, Error)]
pub enum AdminError {
    /// The configured store is not durable.
    #[error("administrative commands need store.type = \"sqlite\"")]
    MemoryStore,
    /// The store could not be opened.
    #[error("failed to open registry store: {0}")]
    Open(String),
    /// Username failed validation.
    #[error("username must be 1-{MAX_USERNAME_BYTES} visible ASCII characters")]
    InvalidUsername,
    /// No principal has the username.
    #[error("unknown user: {0}")]
    UnknownUser(String),
    /// No script has the name.
    #[error("unknown script: {0}")]
    UnknownScript(ScriptName),
    /// Script name failed validation.
    #[error("invalid script name {name:?}: {error}")]
    InvalidScriptName {
        /// Raw name.
        name: String,
        /// Validation failure.
        error: ScriptNameError,
    },
    /// A `key=value` configuration pair was malformed.
    #[error("configuration entries must be key=value: {0:?}")]
    InvalidConfigEntry(String),
    /// Nothing to change.
    #[error("no script flag given")]
    EmptyUpdate,
    /// Token policy rejected the request.
    #[error(transparent)]
    Policy(#[from] TokenPolicyError),
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Parameters for creating a principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    /// Unique username.
    pub username: String,
    /// Role.
    pub role: Role,
    /// Implicit permission over every script.
    pub all_access: bool,
    /// Explicit per-script permissions.
    pub permissions: Vec<String>,
}

/// Parameters for minting a token on behalf of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewToken {
    /// Minting user.
    pub username: String,
    /// Token name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Token kind.
    pub kind: TokenKind,
    /// Scripts for a scoped token.
    pub scripts: Vec<String>,
    /// Raw `key=value` configuration entries.
    pub config: Vec<String>,
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Opens the configured durable registry store.
///
/// # Errors
///
/// Returns [`AdminError::MemoryStore`] for the in-memory store and
/// [`AdminError::Open`] when the database cannot be opened.
pub fn open_admin_store(config: &CapgateConfig) -> Result<Arc<dyn RegistryStore>, AdminError> {
    if config.store.store_type == StoreType::Memory {
        return Err(AdminError::MemoryStore);
    }
    build_store(&config.store).map_err(|err| AdminError::Open(err.to_string()))
}

// ============================================================================
// SECTION: Operations
// ============================================================================

/// Creates an active principal.
///
/// # Errors
///
/// Returns [`AdminError`] when validation fails or the username is taken.
pub fn add_user(store: &dyn RegistryStore, request: NewUser) -> Result<Principal, AdminError> {
    let username = request.username.trim();
    if username.is_empty()
        || username.len() > MAX_USERNAME_BYTES
        || !username.chars().all(|ch| ch.is_ascii_graphic())
    {
        return Err(AdminError::InvalidUsername);
    }
    let permissions = parse_names(&request.permissions)?;
    Ok(store.insert_principal(PrincipalDraft {
        username: username.to_string(),
        role: request.role,
        all_access: request.all_access,
        permissions,
    })?)
}

/// Mints a token for an existing principal.
///
/// # Errors
///
/// Returns [`AdminError`] when the user is unknown, input is malformed, or
/// token policy rejects the request.
pub fn create_token(
    store: Arc<dyn RegistryStore>,
    request: NewToken,
) -> Result<(Principal, AccessToken), AdminError> {
    let principal = store
        .principal_by_username(&request.username)?
        .ok_or_else(|| AdminError::UnknownUser(request.username.clone()))?;
    let mint = MintRequest {
        name: request.name,
        description: request.description,
        kind: request.kind,
        scripts: parse_names(&request.scripts)?,
        config: parse_config_entries(&request.config)?,
    };
    let token = TokenAdmin::new(store).mint(&principal, mint)?;
    Ok((principal, token))
}

/// Updates the public/online flags of a registered script.
///
/// # Errors
///
/// Returns [`AdminError`] when the script is unknown or no flag is given.
pub fn set_script(
    store: &dyn RegistryStore,
    name: &str,
    is_public: Option<bool>,
    is_online: Option<bool>,
) -> Result<CapabilityScript, AdminError> {
    if is_public.is_none() && is_online.is_none() {
        return Err(AdminError::EmptyUpdate);
    }
    let name = parse_name(name)?;
    let update = ScriptUpdate {
        is_public,
        is_online,
        ..ScriptUpdate::default()
    };
    if !store.update_script(&name, &update)? {
        return Err(AdminError::UnknownScript(name));
    }
    store.script(&name)?.ok_or(AdminError::UnknownScript(name))
}

/// Parses `key=value` entries into a configuration mapping.
///
/// # Errors
///
/// Returns [`AdminError::InvalidConfigEntry`] for entries without `=` or
/// with an empty key.
pub fn parse_config_entries(entries: &[String]) -> Result<ConfigMap, AdminError> {
    let mut config = ConfigMap::new();
    for entry in entries {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(AdminError::InvalidConfigEntry(entry.clone()));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(AdminError::InvalidConfigEntry(entry.clone()));
        }
        config.insert(key.to_string(), value.to_string());
    }
    Ok(config)
}

/// Validates one script name.
fn parse_name(name: &str) -> Result<ScriptName, AdminError> {
    ScriptName::parse(name).map_err(|error| AdminError::InvalidScriptName {
        name: name.to_string(),
        error,
    })
}

/// Validates a list of script names.
fn parse_names(names: &[String]) -> Result<BTreeSet<ScriptName>, AdminError> {
    names.iter().map(|name| parse_name(name)).collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
