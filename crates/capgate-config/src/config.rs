// crates/capgate-config/src/config.rs
// ============================================================================
// Module: Capgate Configuration
// Description: Configuration loading and validation for the gateway.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: capgate-core, capgate-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Missing or invalid configuration fails closed. Every section has defaults,
//! so an empty file yields a loopback server over an in-memory store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use capgate_core::CidrBlock;
use capgate_core::GuardPolicy;
use capgate_store_sqlite::SqliteStoreConfig;
use capgate_store_sqlite::SqliteStoreMode;
use capgate_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "capgate.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "CAPGATE_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default bind address.
const DEFAULT_BIND: &str = "127.0.0.1:8080";
/// Default handler deadline in milliseconds.
const DEFAULT_HANDLER_TIMEOUT_MS: u64 = 30_000;
/// Upper bound for the handler deadline in milliseconds.
const MAX_HANDLER_TIMEOUT_MS: u64 = 600_000;
/// Default maximum raw query length in bytes.
const DEFAULT_MAX_QUERY_BYTES: usize = 8 * 1024;
/// Upper bound for the raw query length in bytes.
const MAX_QUERY_BYTES_LIMIT: usize = 1024 * 1024;
/// Default guard failure threshold.
const DEFAULT_GUARD_MAX_FAILURES: u32 = 5;
/// Default guard window and ban duration in seconds.
const DEFAULT_GUARD_SECS: u64 = 300;
/// Default cap on tracked guard addresses.
const DEFAULT_GUARD_MAX_TRACKED: usize = 10_000;
/// Maximum entries per guard CIDR list.
const MAX_GUARD_LIST_ENTRIES: usize = 1_024;
/// Default plugin root.
const DEFAULT_SCRIPTS_ROOT: &str = "scripts";
/// Default `SQLite` busy timeout in milliseconds.
const DEFAULT_STORE_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Root gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapgateConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Abuse guard settings.
    #[serde(default)]
    pub guard: GuardConfig,
    /// Plugin tree settings.
    #[serde(default)]
    pub scripts: ScriptsConfig,
    /// Registry store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Audit logging settings.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl CapgateConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// The path is taken from `path`, else `CAPGATE_CONFIG`, else
    /// `capgate.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.guard.validate()?;
        self.scripts.validate()?;
        self.store.validate()?;
        self.audit.validate()?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address to bind.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Shared deadline for unit loading and handler execution.
    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,
    /// Use the last `X-Forwarded-For` entry as the client address.
    #[serde(default)]
    pub trust_forwarded_for: bool,
    /// Maximum raw query string length in bytes.
    #[serde(default = "default_max_query_bytes")]
    pub max_query_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            handler_timeout_ms: default_handler_timeout_ms(),
            trust_forwarded_for: false,
            max_query_bytes: default_max_query_bytes(),
        }
    }
}

impl ServerConfig {
    /// Returns the parsed bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the address does not parse.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid("invalid bind address".to_string()))
    }

    /// Returns the handler deadline.
    #[must_use]
    pub const fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    /// Validates server configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if self.handler_timeout_ms == 0 || self.handler_timeout_ms > MAX_HANDLER_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "server.handler_timeout_ms must be between 1 and {MAX_HANDLER_TIMEOUT_MS}"
            )));
        }
        if self.max_query_bytes == 0 || self.max_query_bytes > MAX_QUERY_BYTES_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "server.max_query_bytes must be between 1 and {MAX_QUERY_BYTES_LIMIT}"
            )));
        }
        Ok(())
    }
}

/// Returns the default bind address.
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

/// Returns the default handler deadline.
const fn default_handler_timeout_ms() -> u64 {
    DEFAULT_HANDLER_TIMEOUT_MS
}

/// Returns the default query length limit.
const fn default_max_query_bytes() -> usize {
    DEFAULT_MAX_QUERY_BYTES
}

// ============================================================================
// SECTION: Guard
// ============================================================================

/// Abuse guard configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    /// Enable failure tracking and bans.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Failures inside the window that trigger a ban.
    #[serde(default = "default_guard_max_failures")]
    pub max_failures: u32,
    /// Failure window in seconds.
    #[serde(default = "default_guard_secs")]
    pub window_secs: u64,
    /// Ban duration in seconds.
    #[serde(default = "default_guard_secs")]
    pub ban_secs: u64,
    /// CIDR blocks exempt from failure counting.
    #[serde(default)]
    pub allowlist: Vec<String>,
    /// CIDR blocks always rejected.
    #[serde(default)]
    pub denylist: Vec<String>,
    /// Cap on tracked addresses before idle entries are pruned.
    #[serde(default = "default_guard_max_tracked")]
    pub max_tracked: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failures: DEFAULT_GUARD_MAX_FAILURES,
            window_secs: DEFAULT_GUARD_SECS,
            ban_secs: DEFAULT_GUARD_SECS,
            allowlist: Vec::new(),
            denylist: Vec::new(),
            max_tracked: DEFAULT_GUARD_MAX_TRACKED,
        }
    }
}

impl GuardConfig {
    /// Builds the runtime guard policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a CIDR entry does not parse.
    pub fn policy(&self) -> Result<GuardPolicy, ConfigError> {
        Ok(GuardPolicy {
            max_failures: self.max_failures,
            window: Duration::from_secs(self.window_secs),
            ban_duration: Duration::from_secs(self.ban_secs),
            allowlist: parse_cidr_list("guard.allowlist", &self.allowlist)?,
            denylist: parse_cidr_list("guard.denylist", &self.denylist)?,
            max_tracked: self.max_tracked,
        })
    }

    /// Validates guard configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_failures == 0 {
            return Err(ConfigError::Invalid(
                "guard.max_failures must be greater than zero".to_string(),
            ));
        }
        if self.window_secs == 0 || self.ban_secs == 0 {
            return Err(ConfigError::Invalid(
                "guard.window_secs and guard.ban_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_tracked == 0 {
            return Err(ConfigError::Invalid(
                "guard.max_tracked must be greater than zero".to_string(),
            ));
        }
        self.policy()?;
        Ok(())
    }
}

/// Parses a CIDR list, naming the field on failure.
fn parse_cidr_list(field: &str, entries: &[String]) -> Result<Vec<CidrBlock>, ConfigError> {
    if entries.len() > MAX_GUARD_LIST_ENTRIES {
        return Err(ConfigError::Invalid(format!(
            "{field} exceeds {MAX_GUARD_LIST_ENTRIES} entries"
        )));
    }
    entries
        .iter()
        .map(|entry| {
            entry
                .trim()
                .parse()
                .map_err(|err| ConfigError::Invalid(format!("{field} entry {entry:?}: {err}")))
        })
        .collect()
}

/// Returns true.
const fn default_true() -> bool {
    true
}

/// Returns the default guard threshold.
const fn default_guard_max_failures() -> u32 {
    DEFAULT_GUARD_MAX_FAILURES
}

/// Returns the default guard window and ban length.
const fn default_guard_secs() -> u64 {
    DEFAULT_GUARD_SECS
}

/// Returns the default tracked-address cap.
const fn default_guard_max_tracked() -> usize {
    DEFAULT_GUARD_MAX_TRACKED
}

// ============================================================================
// SECTION: Scripts
// ============================================================================

/// Plugin tree configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptsConfig {
    /// Plugin root directory.
    #[serde(default = "default_scripts_root")]
    pub root: String,
    /// Reconcile the registry when the server starts.
    #[serde(default = "default_true")]
    pub reconcile_on_start: bool,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            root: default_scripts_root(),
            reconcile_on_start: true,
        }
    }
}

impl ScriptsConfig {
    /// Returns the plugin root as a path.
    #[must_use]
    pub fn root_path(&self) -> PathBuf {
        PathBuf::from(self.root.trim())
    }

    /// Validates plugin tree configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path_string("scripts.root", &self.root)
    }
}

/// Returns the default plugin root.
fn default_scripts_root() -> String {
    DEFAULT_SCRIPTS_ROOT.to_string()
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Registry store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Use the in-memory store.
    #[default]
    Memory,
    /// Use `SQLite`-backed durable store.
    Sqlite,
}

/// Registry store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Store backend type.
    #[serde(rename = "type", default)]
    pub store_type: StoreType,
    /// `SQLite` database path when using the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_store_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            path: None,
            busy_timeout_ms: default_store_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

impl StoreConfig {
    /// Returns the `SQLite` settings when the sqlite backend is selected.
    #[must_use]
    pub fn sqlite(&self) -> Option<SqliteStoreConfig> {
        match (self.store_type, &self.path) {
            (StoreType::Sqlite, Some(path)) => Some(SqliteStoreConfig {
                path: path.clone(),
                busy_timeout_ms: self.busy_timeout_ms,
                journal_mode: self.journal_mode,
                sync_mode: self.sync_mode,
            }),
            _ => None,
        }
    }

    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.store_type {
            StoreType::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid("memory store must not set path".to_string()));
                }
                Ok(())
            }
            StoreType::Sqlite => {
                let path = self.path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("sqlite store requires path".to_string())
                })?;
                validate_path_string("store.path", &path.to_string_lossy())?;
                if self.busy_timeout_ms == 0 {
                    return Err(ConfigError::Invalid(
                        "store.busy_timeout_ms must be greater than zero".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Returns the default store busy timeout.
const fn default_store_busy_timeout_ms() -> u64 {
    DEFAULT_STORE_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Audit logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Enable structured audit logging.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Optional audit log path (JSON lines); stderr when unset.
    #[serde(default)]
    pub path: Option<String>,
    /// Include handler payloads in invocation records.
    #[serde(default = "default_true")]
    pub log_payloads: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            log_payloads: true,
        }
    }
}

impl AuditConfig {
    /// Validates audit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            validate_path_string("audit.path", path)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
