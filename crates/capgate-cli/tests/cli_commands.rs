// crates/capgate-cli/tests/cli_commands.rs
// ============================================================================
// Module: CLI Command Tests
// Description: Integration tests running the `capgate` binary.
// Purpose: Ensure config, registry, and administration commands behave end to end.
// Dependencies: capgate-cli binary, capgate-config, capgate-gateway, tempfile
// ============================================================================

//! ## Overview
//! Runs the CLI binary against a temporary plugin tree and SQLite store, then
//! inspects the store directly to confirm the administrative writes.
//!
//! Security posture: configuration inputs are untrusted; failures must be
//! reported on stderr with a non-zero exit code.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Output;

use capgate_config::CapgateConfig;
use capgate_core::ScriptName;
use capgate_gateway::build_store;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn capgate_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_capgate"))
}

/// Temporary workspace with a plugin tree and a config file.
struct Workspace {
    /// Root directory.
    dir: TempDir,
    /// Config file path.
    config: PathBuf,
}

impl Workspace {
    /// Creates the workspace; `{db}` in `store` expands to a database path.
    fn new(store: &str) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let scripts = dir.path().join("scripts");
        fs::create_dir_all(scripts.join("a")).expect("plugin tree");
        fs::write(
            scripts.join("a/greet.toml"),
            "description = \"Greets\"\n[[exports]]\nfunction = \"main\"\nhandler = \
             \"salutation.greet\"\nentrypoint = true\n",
        )
        .expect("write unit");
        fs::write(
            scripts.join("notes.toml"),
            "[[exports]]\nfunction = \"helper\"\nhandler = \"diagnostics.echo\"\n",
        )
        .expect("write unit");
        let store = store.replace("{db}", &toml_string(&dir.path().join("capgate.db")));
        let config = dir.path().join("capgate.toml");
        let body = format!(
            "[server]\nbind = \"127.0.0.1:0\"\n\n[scripts]\nroot = {}\n\n{store}\n\n[audit]\npath \
             = {}\n",
            toml_string(&scripts),
            toml_string(&dir.path().join("audit.log")),
        );
        fs::write(&config, body).expect("write config");
        Self {
            dir,
            config,
        }
    }

    fn sqlite() -> Self {
        Self::new("[store]\ntype = \"sqlite\"\npath = {db}")
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(capgate_bin())
            .args(args)
            .arg("--config")
            .arg(&self.config)
            .env_remove("CAPGATE_ALLOW_NON_LOOPBACK")
            .output()
            .expect("run capgate")
    }

    fn load_config(&self) -> CapgateConfig {
        CapgateConfig::load(Some(self.config.as_path())).expect("load config")
    }
}

fn toml_string(path: &Path) -> String {
    format!("{:?}", path.to_string_lossy())
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

#[test]
fn config_validate_accepts_a_valid_file() {
    let workspace = Workspace::sqlite();
    let output = workspace.run(&["config", "validate"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Config valid."));
}

#[test]
fn config_validate_fails_closed() {
    let workspace = Workspace::new("[store]\ntype = \"sqlite\"");
    let output = workspace.run(&["config", "validate"]);
    assert!(!output.status.success());
    let stderr = stderr(&output);
    assert!(stderr.contains("Failed to load config"), "unexpected stderr: {stderr}");
    assert!(stderr.contains("sqlite store requires path"), "unexpected stderr: {stderr}");
}

#[test]
fn config_example_is_a_valid_config() {
    let output = Command::new(capgate_bin()).args(["config", "example"]).output().unwrap();
    assert!(output.status.success());
    CapgateConfig::from_toml(&stdout(&output)).expect("example parses");
}

// ============================================================================
// SECTION: Administration
// ============================================================================

#[test]
fn reconcile_and_administration_persist_to_the_store() {
    let workspace = Workspace::sqlite();

    let output = workspace.run(&["reconcile"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Reconciled: 1 added, 0 removed, 0 updated."));
    assert!(stderr(&output).contains("Skipped notes.toml: no entrypoint declared"));

    let output = workspace.run(&["reconcile"]);
    assert!(stdout(&output).contains("Reconciled: 0 added, 0 removed, 0 updated."));

    let output = workspace.run(&["user", "add", "alice", "--permit", "greet"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Created user alice"));

    let output = workspace.run(&[
        "token", "create", "--user", "alice", "--name", "ci", "--script", "greet", "--set",
        "region=eu",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("Created scoped token ci"));
    let secret = text
        .lines()
        .find_map(|line| line.strip_prefix("Secret (shown once): "))
        .expect("secret line")
        .to_string();

    let output = workspace.run(&["script", "set", "greet", "--online", "true"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Script greet: public=false online=true."));

    let store = build_store(&workspace.load_config().store).expect("open store");
    let script = store.script(&ScriptName::from("greet")).unwrap().expect("registered");
    assert_eq!(script.path, "a/greet.toml");
    assert!(script.is_online && !script.is_public);
    let token = store.token_by_secret(&secret).unwrap().expect("token stored");
    assert!(token.is_active);
    assert_eq!(token.config.get("region").map(String::as_str), Some("eu"));

    let audit = fs::read_to_string(workspace.dir.path().join("audit.log")).expect("audit log");
    assert!(audit.lines().any(|line| line.contains("\"action\":\"reconciled\"")));
    assert!(audit.lines().any(|line| line.contains("\"action\":\"unit_skipped\"")));
    assert!(!audit.contains(&secret));
}

#[test]
fn token_policy_failures_are_reported() {
    let workspace = Workspace::sqlite();
    assert!(workspace.run(&["reconcile"]).status.success());
    assert!(workspace.run(&["user", "add", "bob"]).status.success());

    let output =
        workspace.run(&["token", "create", "--user", "bob", "--name", "x", "--script", "greet"]);
    assert!(!output.status.success());
    let message = "token create failed: principal may not grant access to: greet";
    assert!(stderr(&output).contains(message), "stderr: {}", stderr(&output));

    let output =
        workspace.run(&["token", "create", "--user", "bob", "--name", "x", "--kind", "universal"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("only administrators may mint universal tokens"));
}

#[test]
fn administration_requires_a_durable_store() {
    let workspace = Workspace::new("[store]\ntype = \"memory\"");
    let output = workspace.run(&["user", "add", "alice"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Administrative commands need a durable store"));
}

// ============================================================================
// SECTION: Serve Policy
// ============================================================================

#[test]
fn serve_refuses_non_loopback_without_opt_in() {
    let workspace = Workspace::sqlite();
    let mut config = fs::read_to_string(&workspace.config).unwrap();
    config = config.replace("127.0.0.1:0", "0.0.0.0:0");
    fs::write(&workspace.config, config).unwrap();

    let output = workspace.run(&["serve"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Refusing to bind to non-loopback address 0.0.0.0:0"));

    let output = Command::new(capgate_bin())
        .args(["serve", "--config"])
        .arg(&workspace.config)
        .env("CAPGATE_ALLOW_NON_LOOPBACK", "maybe")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Invalid value for CAPGATE_ALLOW_NON_LOOPBACK: maybe"));
}
