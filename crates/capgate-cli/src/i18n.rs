// crates/capgate-cli/src/i18n.rs
// ============================================================================
// Module: CLI Message Catalog
// Description: Message catalog and substitution helpers for CLI output.
// Purpose: Centralize user-facing strings so output stays consistent.
// Dependencies: Standard library collections.
// ============================================================================

//! ## Overview
//! Every line the `capgate` binary prints is looked up in a static catalog and
//! formatted through the [`t!`](crate::t) macro.
//!
//! ## Invariants
//! - The catalog is initialized once and read-only thereafter.
//! - Missing keys fall back to the key itself.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::OnceLock;

// ============================================================================
// SECTION: Types
// ============================================================================

/// A formatted message argument captured by the [`macro@crate::t`] macro.
#[derive(Clone)]
pub struct MessageArg {
    /// Placeholder name used in message templates.
    pub key: &'static str,
    /// Value substituted for the placeholder.
    pub value: String,
}

impl MessageArg {
    /// Constructs a new [`MessageArg`].
    pub fn new(key: &'static str, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

// ============================================================================
// SECTION: Catalog
// ============================================================================

/// Static catalog entries.
const CATALOG_ITEMS: &[(&str, &str)] = &[
    ("output.stream.stdout", "stdout"),
    ("output.stream.stderr", "stderr"),
    ("output.stream.unknown", "output"),
    ("output.write_failed", "Failed to write to {stream}: {error}"),
    ("config.load_failed", "Failed to load config: {error}"),
    ("config.validate.ok", "Config valid."),
    ("serve.bind.parse_failed", "Invalid bind address {bind}: {error}"),
    (
        "serve.bind.non_loopback_opt_in",
        "Refusing to bind to non-loopback address {bind}. Set --allow-non-loopback or {env}=1 to \
         opt in.",
    ),
    (
        "serve.bind.allow_env_invalid",
        "Invalid value for {env}: {value}. Expected true/false/1/0/yes/no/on/off.",
    ),
    ("serve.warn.network.header", "SECURITY WARNING: Capgate is exposed on the network."),
    ("serve.warn.network.bind", "Bind: {bind}"),
    ("serve.warn.network.guard", "Abuse guard: {status}"),
    ("serve.warn.network.audit", "Audit logging: {status}"),
    ("serve.warn.network.forwarded", "Trust X-Forwarded-For: {status}"),
    (
        "serve.warn.network.footer",
        "Verify firewall rules and token scopes; this exposure is intentional.",
    ),
    ("status.enabled", "enabled"),
    ("status.disabled", "disabled"),
    ("serve.listening", "Capgate listening on {bind} ({handlers} built-in handlers)."),
    ("serve.init_failed", "Failed to initialize gateway: {error}"),
    ("serve.failed", "Gateway failed: {error}"),
    ("catalog.failed", "Failed to build handler catalog: {error}"),
    ("reconcile.failed", "Reconciliation failed: {error}"),
    ("reconcile.summary", "Reconciled: {added} added, {removed} removed, {updated} updated."),
    ("reconcile.skipped", "Skipped {path}: {reason}"),
    ("store.open_failed", "Failed to open registry store: {error}"),
    (
        "store.memory_unsupported",
        "Administrative commands need a durable store; set store.type = \"sqlite\".",
    ),
    ("admin.failed", "{action} failed: {error}"),
    ("admin.action.user_add", "user add"),
    ("admin.action.token_create", "token create"),
    ("admin.action.script_set", "script set"),
    ("user.add.ok", "Created {role} {username} (id {id})."),
    ("token.create.ok", "Created {kind} token {name} (id {id}) for {username}."),
    ("token.create.secret", "Secret (shown once): {secret}"),
    ("script.set.ok", "Script {name}: public={public} online={online}."),
];

// ============================================================================
// SECTION: Translation
// ============================================================================

/// Looks up `key` and substitutes `args` into its placeholders.
#[must_use]
pub fn translate(key: &str, args: Vec<MessageArg>) -> String {
    let template = catalog().get(key).copied().unwrap_or(key);
    if args.is_empty() {
        return template.to_string();
    }

    let mut result = template.to_string();
    for arg in args {
        let placeholder = format!("{{{}}}", arg.key);
        result = result.replace(&placeholder, &arg.value);
    }
    result
}

/// Returns the static catalog.
fn catalog() -> &'static HashMap<&'static str, &'static str> {
    static CATALOG: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();

    CATALOG.get_or_init(|| CATALOG_ITEMS.iter().copied().collect())
}

// ============================================================================
// SECTION: Macro
// ============================================================================

/// Formats a catalog message from a key and named arguments.
#[macro_export]
macro_rules! t {
    ($key:literal $(, $name:ident = $value:expr )* $(,)?) => {{
        let args = ::std::vec![
            $(
                $crate::i18n::MessageArg::new(stringify!($name), $value.to_string()),
            )*
        ];
        $crate::i18n::translate($key, args)
    }};
}

// ============================================================================
// SECTION: Tests
// ============================================================================
