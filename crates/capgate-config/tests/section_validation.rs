//! Section validation tests for capgate-config.
// crates/capgate-config/tests/section_validation.rs
// =============================================================================
// Module: Section Validation Tests
// Description: Server, guard, scripts, store, and audit constraints.
// Purpose: Ensure inconsistent configuration is rejected before startup.
// =============================================================================

use std::path::PathBuf;

use capgate_config::StoreType;

mod common;

use common::TestResult;
use common::assert_invalid;
use common::minimal_config;

#[test]
fn server_rejects_unparseable_bind() -> TestResult {
    let mut config = minimal_config()?;
    config.server.bind = "localhost".to_string();
    assert_invalid(config.validate(), "invalid bind address")
}

#[test]
fn server_rejects_zero_timeout() -> TestResult {
    let mut config = minimal_config()?;
    config.server.handler_timeout_ms = 0;
    assert_invalid(config.validate(), "server.handler_timeout_ms must be between")
}

#[test]
fn server_rejects_zero_query_limit() -> TestResult {
    let mut config = minimal_config()?;
    config.server.max_query_bytes = 0;
    assert_invalid(config.validate(), "server.max_query_bytes must be between")
}

#[test]
fn guard_rejects_zero_threshold() -> TestResult {
    let mut config = minimal_config()?;
    config.guard.max_failures = 0;
    assert_invalid(config.validate(), "guard.max_failures must be greater than zero")
}

#[test]
fn guard_rejects_zero_window() -> TestResult {
    let mut config = minimal_config()?;
    config.guard.window_secs = 0;
    assert_invalid(config.validate(), "guard.window_secs and guard.ban_secs")
}

#[test]
fn guard_rejects_malformed_cidr() -> TestResult {
    let mut config = minimal_config()?;
    config.guard.denylist = vec!["10.0.0.0/33".to_string()];
    assert_invalid(config.validate(), "guard.denylist entry")?;
    config.guard.denylist = Vec::new();
    config.guard.allowlist = vec!["not-an-ip".to_string()];
    assert_invalid(config.validate(), "guard.allowlist entry")
}

#[test]
fn guard_policy_carries_parsed_blocks() -> TestResult {
    let mut config = minimal_config()?;
    config.guard.denylist = vec!["203.0.113.0/24".to_string()];
    let policy = config.guard.policy().map_err(|err| err.to_string())?;
    let denied = policy.denylist.first().ok_or("missing denylist entry")?;
    if denied.to_string() != "203.0.113.0/24" {
        return Err(format!("unexpected block {denied}"));
    }
    Ok(())
}

#[test]
fn scripts_root_must_be_set() -> TestResult {
    let mut config = minimal_config()?;
    config.scripts.root = "  ".to_string();
    assert_invalid(config.validate(), "scripts.root must be non-empty")
}

#[test]
fn memory_store_rejects_path() -> TestResult {
    let mut config = minimal_config()?;
    config.store.path = Some(PathBuf::from("capgate.db"));
    assert_invalid(config.validate(), "memory store must not set path")
}

#[test]
fn sqlite_store_requires_path() -> TestResult {
    let mut config = minimal_config()?;
    config.store.store_type = StoreType::Sqlite;
    assert_invalid(config.validate(), "sqlite store requires path")
}

#[test]
fn sqlite_store_rejects_zero_busy_timeout() -> TestResult {
    let mut config = minimal_config()?;
    config.store.store_type = StoreType::Sqlite;
    config.store.path = Some(PathBuf::from("capgate.db"));
    config.store.busy_timeout_ms = 0;
    assert_invalid(config.validate(), "store.busy_timeout_ms must be greater than zero")
}

#[test]
fn audit_path_is_length_checked() -> TestResult {
    let mut config = minimal_config()?;
    config.audit.path = Some(format!("logs/{}", "a".repeat(300)));
    assert_invalid(config.validate(), "audit.path path component too long")
}
