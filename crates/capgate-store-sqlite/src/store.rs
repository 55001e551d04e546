// crates/capgate-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Registry Store
// Description: Durable RegistryStore backed by SQLite.
// Purpose: Persist scripts, tokens, and principals with transactional writes.
// Dependencies: capgate-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements a durable [`RegistryStore`] using `SQLite`. Every
//! multi-row write runs in a single transaction, so a reconciliation plan is
//! committed whole or not at all. Script removal cascades into token scopes
//! and principal permissions through foreign keys.
//! Security posture: database contents are untrusted; rows that fail to decode
//! surface as corruption rather than defaulted values.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use capgate_core::AccessToken;
use capgate_core::CapabilityScript;
use capgate_core::ConfigMap;
use capgate_core::Principal;
use capgate_core::PrincipalDraft;
use capgate_core::ReconcilePlan;
use capgate_core::RegistryStore;
use capgate_core::Role;
use capgate_core::ScriptName;
use capgate_core::ScriptUpdate;
use capgate_core::StoreError;
use capgate_core::TokenDraft;
use capgate_core::TokenId;
use capgate_core::TokenKind;
use capgate_core::UserId;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::Transaction;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Columns selected for script rows.
const SCRIPT_COLUMNS: &str = "name, path, is_public, is_online, description, doc";
/// Columns selected for token rows.
const TOKEN_COLUMNS: &str =
    "id, secret, name, description, creator_id, is_active, kind, config_json";
/// Columns selected for user rows.
const USER_COLUMNS: &str = "id, username, role, is_active, all_access";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` registry store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Creates a configuration with default tuning for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages never embed token secrets.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Stored row could not be decoded.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid request or data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Write collides with an existing record.
    #[error("sqlite store conflict: {0}")]
    Conflict(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed registry store.
///
/// # Invariants
/// - `SQLite` connection access is serialized through a mutex.
/// - Foreign keys are enforced on every connection.
#[derive(Clone)]
pub struct SqliteRegistryStore {
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteRegistryStore {
    /// Opens an `SQLite`-backed registry store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Verifies the store can execute a simple SQL statement.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the mutex is poisoned or the query fails.
    pub fn readiness(&self) -> Result<(), SqliteStoreError> {
        self.lock()?.execute_batch("SELECT 1").map_err(db_error)
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite mutex poisoned".to_string()))
    }

    /// Runs `work` inside a transaction and commits on success.
    fn write<T>(
        &self,
        work: impl FnOnce(&Transaction<'_>) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let mut connection = self.lock()?;
        let tx = connection.transaction().map_err(db_error)?;
        let value = work(&tx)?;
        tx.commit().map_err(db_error)?;
        Ok(value)
    }
}

impl RegistryStore for SqliteRegistryStore {
    fn script(&self, name: &ScriptName) -> Result<Option<CapabilityScript>, StoreError> {
        let connection = self.lock()?;
        Ok(fetch_script(&connection, name)?)
    }

    fn scripts(&self) -> Result<Vec<CapabilityScript>, StoreError> {
        let connection = self.lock()?;
        let mut stmt = connection
            .prepare(&format!("SELECT {SCRIPT_COLUMNS} FROM scripts ORDER BY name"))
            .map_err(db_error)?;
        let rows = stmt.query_map([], script_from_row).map_err(db_error)?;
        let mut scripts = Vec::new();
        for row in rows {
            scripts.push(row.map_err(db_error)?);
        }
        Ok(scripts)
    }

    fn apply_reconciliation(&self, plan: &ReconcilePlan) -> Result<(), StoreError> {
        Ok(self.write(|tx| {
            for (name, path) in &plan.to_add {
                tx.execute(
                    "INSERT INTO scripts (name, path, is_public, is_online) VALUES (?1, ?2, 0, 0)",
                    params![name.as_str(), path],
                )
                .map_err(|err| {
                    conflict_or_db(err, &format!("script already registered: {name}"))
                })?;
            }
            for (name, path) in &plan.to_update {
                let changed = tx
                    .execute(
                        "UPDATE scripts SET path = ?2 WHERE name = ?1",
                        params![name.as_str(), path],
                    )
                    .map_err(db_error)?;
                if changed == 0 {
                    return Err(SqliteStoreError::Conflict(format!(
                        "script not registered: {name}"
                    )));
                }
            }
            for name in &plan.to_remove {
                let changed = tx
                    .execute("DELETE FROM scripts WHERE name = ?1", params![name.as_str()])
                    .map_err(db_error)?;
                if changed == 0 {
                    return Err(SqliteStoreError::Conflict(format!(
                        "script not registered: {name}"
                    )));
                }
            }
            Ok(())
        })?)
    }

    fn update_script(&self, name: &ScriptName, update: &ScriptUpdate) -> Result<bool, StoreError> {
        Ok(self.write(|tx| {
            let Some(mut script) = fetch_script(tx, name)? else {
                return Ok(false);
            };
            update.apply_to(&mut script);
            tx.execute(
                "UPDATE scripts SET is_public = ?2, is_online = ?3, description = ?4, doc = ?5 \
                 WHERE name = ?1",
                params![
                    name.as_str(),
                    script.is_public,
                    script.is_online,
                    script.description,
                    script.doc
                ],
            )
            .map_err(db_error)?;
            Ok(true)
        })?)
    }

    fn token_by_secret(&self, secret: &str) -> Result<Option<AccessToken>, StoreError> {
        let connection = self.lock()?;
        Ok(fetch_token(&connection, "secret = ?1", &secret)?)
    }

    fn token(&self, id: TokenId) -> Result<Option<AccessToken>, StoreError> {
        let connection = self.lock()?;
        Ok(fetch_token(&connection, "id = ?1", &to_sql_id(id.get())?)?)
    }

    fn insert_token(&self, draft: TokenDraft, secret: String) -> Result<AccessToken, StoreError> {
        Ok(self.write(|tx| {
            ensure_scripts_exist(tx, &draft.accessible_scripts)?;
            let config_json = encode_config(&draft.config)?;
            tx.execute(
                "INSERT INTO tokens (secret, name, description, creator_id, is_active, kind, \
                 config_json) VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)",
                params![
                    secret,
                    draft.name,
                    draft.description,
                    to_sql_id(draft.creator.get())?,
                    draft.kind.as_str(),
                    config_json
                ],
            )
            .map_err(|err| conflict_or_db(err, "token secret already in use"))?;
            let id = from_sql_id(tx.last_insert_rowid())?;
            insert_token_scripts(tx, id, &draft.accessible_scripts)?;
            Ok(draft.into_token(TokenId::new(id), secret))
        })?)
    }

    fn save_token(&self, token: &AccessToken) -> Result<(), StoreError> {
        Ok(self.write(|tx| {
            ensure_scripts_exist(tx, &token.accessible_scripts)?;
            let id = token.id.get();
            let changed = tx
                .execute(
                    "UPDATE tokens SET name = ?2, description = ?3, is_active = ?4, kind = ?5, \
                     config_json = ?6 WHERE id = ?1",
                    params![
                        to_sql_id(id)?,
                        token.name,
                        token.description,
                        token.is_active,
                        token.kind.as_str(),
                        encode_config(&token.config)?
                    ],
                )
                .map_err(db_error)?;
            if changed == 0 {
                return Err(SqliteStoreError::Invalid(format!("unknown token: {}", token.id)));
            }
            tx.execute("DELETE FROM token_scripts WHERE token_id = ?1", params![to_sql_id(id)?])
                .map_err(db_error)?;
            insert_token_scripts(tx, id, &token.accessible_scripts)
        })?)
    }

    fn delete_token(&self, id: TokenId) -> Result<bool, StoreError> {
        Ok(self.write(|tx| {
            let changed = tx
                .execute("DELETE FROM tokens WHERE id = ?1", params![to_sql_id(id.get())?])
                .map_err(db_error)?;
            Ok(changed > 0)
        })?)
    }

    fn principal(&self, id: UserId) -> Result<Option<Principal>, StoreError> {
        let connection = self.lock()?;
        Ok(fetch_principal(&connection, "id = ?1", &to_sql_id(id.get())?)?)
    }

    fn principal_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError> {
        let connection = self.lock()?;
        Ok(fetch_principal(&connection, "username = ?1", &username)?)
    }

    fn insert_principal(&self, draft: PrincipalDraft) -> Result<Principal, StoreError> {
        Ok(self.write(|tx| {
            ensure_scripts_exist(tx, &draft.permissions)?;
            tx.execute(
                "INSERT INTO users (username, role, is_active, all_access) VALUES (?1, ?2, 1, ?3)",
                params![draft.username, draft.role.as_str(), draft.all_access],
            )
            .map_err(|err| conflict_or_db(err, &format!("username taken: {}", draft.username)))?;
            let id = from_sql_id(tx.last_insert_rowid())?;
            for name in &draft.permissions {
                tx.execute(
                    "INSERT INTO user_permissions (user_id, script_name) VALUES (?1, ?2)",
                    params![to_sql_id(id)?, name.as_str()],
                )
                .map_err(db_error)?;
            }
            Ok(draft.into_principal(UserId::new(id)))
        })?)
    }
}

// ============================================================================
// SECTION: Row Access
// ============================================================================

/// Loads a script row by name.
fn fetch_script(
    connection: &Connection,
    name: &ScriptName,
) -> Result<Option<CapabilityScript>, SqliteStoreError> {
    connection
        .query_row(
            &format!("SELECT {SCRIPT_COLUMNS} FROM scripts WHERE name = ?1"),
            params![name.as_str()],
            script_from_row,
        )
        .optional()
        .map_err(db_error)
}

/// Decodes a script row.
fn script_from_row(row: &Row<'_>) -> rusqlite::Result<CapabilityScript> {
    Ok(CapabilityScript {
        name: ScriptName::new(row.get::<_, String>(0)?),
        path: row.get(1)?,
        is_public: row.get(2)?,
        is_online: row.get(3)?,
        description: row.get(4)?,
        doc: row.get(5)?,
    })
}

/// Raw token columns before decoding.
struct TokenRow {
    /// Row identifier.
    id: i64,
    /// Secret value.
    secret: String,
    /// Token name.
    name: String,
    /// Token description.
    description: Option<String>,
    /// Creator user id.
    creator_id: i64,
    /// Active flag.
    is_active: bool,
    /// Kind label.
    kind: String,
    /// Encoded configuration.
    config_json: String,
}

/// Loads one token matching `predicate` with its accessible scripts.
fn fetch_token(
    connection: &Connection,
    predicate: &str,
    key: &dyn rusqlite::ToSql,
) -> Result<Option<AccessToken>, SqliteStoreError> {
    let row = connection
        .query_row(&format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE {predicate}"), [key], |row| {
            Ok(TokenRow {
                id: row.get(0)?,
                secret: row.get(1)?,
                name: row.get(2)?,
                description: row.get(3)?,
                creator_id: row.get(4)?,
                is_active: row.get(5)?,
                kind: row.get(6)?,
                config_json: row.get(7)?,
            })
        })
        .optional()
        .map_err(db_error)?;
    let Some(row) = row else {
        return Ok(None);
    };
    let kind = TokenKind::from_label(&row.kind)
        .ok_or_else(|| SqliteStoreError::Corrupt(format!("unknown token kind: {}", row.kind)))?;
    let config: ConfigMap = serde_json::from_str(&row.config_json)
        .map_err(|err| SqliteStoreError::Corrupt(format!("token config: {err}")))?;
    let accessible_scripts = names_for(
        connection,
        "SELECT script_name FROM token_scripts WHERE token_id = ?1",
        row.id,
    )?;
    Ok(Some(AccessToken {
        id: TokenId::new(from_sql_id(row.id)?),
        secret: row.secret,
        name: row.name,
        description: row.description,
        creator: UserId::new(from_sql_id(row.creator_id)?),
        is_active: row.is_active,
        kind,
        accessible_scripts,
        config,
    }))
}

/// Loads one principal matching `predicate` with its permissions.
fn fetch_principal(
    connection: &Connection,
    predicate: &str,
    key: &dyn rusqlite::ToSql,
) -> Result<Option<Principal>, SqliteStoreError> {
    let row = connection
        .query_row(&format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate}"), [key], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, bool>(4)?,
            ))
        })
        .optional()
        .map_err(db_error)?;
    let Some((id, username, role, is_active, all_access)) = row else {
        return Ok(None);
    };
    let role = Role::from_label(&role)
        .ok_or_else(|| SqliteStoreError::Corrupt(format!("unknown role: {role}")))?;
    let permissions =
        names_for(connection, "SELECT script_name FROM user_permissions WHERE user_id = ?1", id)?;
    Ok(Some(Principal {
        id: UserId::new(from_sql_id(id)?),
        username,
        role,
        is_active,
        all_access,
        permissions,
    }))
}

/// Collects script names from a single-column query keyed by `id`.
fn names_for(
    connection: &Connection,
    sql: &str,
    id: i64,
) -> Result<BTreeSet<ScriptName>, SqliteStoreError> {
    let mut stmt = connection.prepare(sql).map_err(db_error)?;
    let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0)).map_err(db_error)?;
    let mut names = BTreeSet::new();
    for row in rows {
        names.insert(ScriptName::new(row.map_err(db_error)?));
    }
    Ok(names)
}

/// Rejects references to unregistered scripts.
fn ensure_scripts_exist(
    tx: &Transaction<'_>,
    names: &BTreeSet<ScriptName>,
) -> Result<(), SqliteStoreError> {
    for name in names {
        if fetch_script(tx, name)?.is_none() {
            return Err(SqliteStoreError::Invalid(format!("unknown script: {name}")));
        }
    }
    Ok(())
}

/// Writes the token's accessible-script rows.
fn insert_token_scripts(
    tx: &Transaction<'_>,
    token_id: u64,
    names: &BTreeSet<ScriptName>,
) -> Result<(), SqliteStoreError> {
    let token_id = to_sql_id(token_id)?;
    for name in names {
        tx.execute(
            "INSERT INTO token_scripts (token_id, script_name) VALUES (?1, ?2)",
            params![token_id, name.as_str()],
        )
        .map_err(db_error)?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Maps an engine error.
#[allow(clippy::needless_pass_by_value, reason = "Used as a map_err adapter.")]
fn db_error(err: rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(err.to_string())
}

/// Maps a constraint violation to a conflict and anything else to a db error.
fn conflict_or_db(err: rusqlite::Error, conflict: &str) -> SqliteStoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => SqliteStoreError::Conflict(conflict.to_string()),
        _ => db_error(err),
    }
}

/// Serializes a configuration mapping.
fn encode_config(config: &ConfigMap) -> Result<String, SqliteStoreError> {
    serde_json::to_string(config).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Converts a surrogate key to its `SQLite` integer form.
fn to_sql_id(id: u64) -> Result<i64, SqliteStoreError> {
    i64::try_from(id).map_err(|_| SqliteStoreError::Invalid(format!("id out of range: {id}")))
}

/// Converts a stored integer key to a surrogate key.
fn from_sql_id(id: i64) -> Result<u64, SqliteStoreError> {
    u64::try_from(id).map_err(|_| SqliteStoreError::Corrupt(format!("negative id: {id}")))
}

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(db_error)?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db_error)?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(db_error)?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(db_error)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db_error)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_error)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db_error)?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS scripts (
                    name TEXT PRIMARY KEY,
                    path TEXT NOT NULL,
                    is_public INTEGER NOT NULL DEFAULT 0,
                    is_online INTEGER NOT NULL DEFAULT 0,
                    description TEXT,
                    doc TEXT
                );
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    role TEXT NOT NULL,
                    is_active INTEGER NOT NULL,
                    all_access INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS user_permissions (
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    script_name TEXT NOT NULL REFERENCES scripts(name) ON DELETE CASCADE,
                    PRIMARY KEY (user_id, script_name)
                );
                CREATE TABLE IF NOT EXISTS tokens (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    secret TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    description TEXT,
                    creator_id INTEGER NOT NULL REFERENCES users(id),
                    is_active INTEGER NOT NULL,
                    kind TEXT NOT NULL,
                    config_json TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS token_scripts (
                    token_id INTEGER NOT NULL REFERENCES tokens(id) ON DELETE CASCADE,
                    script_name TEXT NOT NULL REFERENCES scripts(name) ON DELETE CASCADE,
                    PRIMARY KEY (token_id, script_name)
                );
                CREATE INDEX IF NOT EXISTS idx_token_scripts_script
                    ON token_scripts (script_name);",
            )
            .map_err(db_error)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(db_error)?;
    Ok(())
}
