// crates/capgate-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example configuration payload.
// Purpose: Deterministic starting point for operators and tooling.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Canonical example for `capgate.toml`. The payload is static and must
//! always pass [`crate::CapgateConfig::from_toml`].

/// Returns a canonical example `capgate.toml` configuration.
#[must_use]
pub fn config_toml_example() -> String {
    String::from(
        r#"[server]
bind = "127.0.0.1:8080"
handler_timeout_ms = 30000
trust_forwarded_for = false
max_query_bytes = 8192

[guard]
enabled = true
max_failures = 5
window_secs = 300
ban_secs = 300
allowlist = ["127.0.0.1/32", "::1"]
denylist = []
max_tracked = 10000

[scripts]
root = "scripts"
reconcile_on_start = true

[store]
type = "sqlite"
path = "capgate.db"
journal_mode = "wal"
sync_mode = "full"
busy_timeout_ms = 5000

[audit]
enabled = true
# path = "capgate-audit.jsonl"
log_payloads = true
"#,
    )
}
