// crates/capgate-cli/src/builtin.rs
// ============================================================================
// Module: Built-in Handlers
// Description: Handler catalog compiled into the `capgate` binary.
// Purpose: Give unit manifests a set of ready-made entrypoints.
// Dependencies: capgate-scripts, async-trait, serde_json
// ============================================================================

//! ## Overview
//! Unit manifests name handlers by catalog key. The binary ships a small set
//! so that a fresh plugin tree can be served without writing Rust:
//!
//! | Key | Parameters | Result |
//! |---|---|---|
//! | `salutation.greet` | `nom`, `titre` (default `Monsieur/Madame`) | `{"message": ...}` |
//! | `diagnostics.echo` | `message` | request id, caller, echoed message |
//! | `diagnostics.config` | none | merged script and token configuration |

use std::sync::Arc;

use async_trait::async_trait;
use capgate_scripts::CatalogError;
use capgate_scripts::Environment;
use capgate_scripts::HandlerCatalog;
use capgate_scripts::HandlerError;
use capgate_scripts::ParamSpec;
use capgate_scripts::ScriptArgs;
use capgate_scripts::ScriptHandler;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Catalog
// ============================================================================

/// Catalog key of the greeting handler.
pub const GREET_HANDLER: &str = "salutation.greet";
/// Catalog key of the echo handler.
pub const ECHO_HANDLER: &str = "diagnostics.echo";
/// Catalog key of the configuration handler.
pub const CONFIG_HANDLER: &str = "diagnostics.config";

/// Builds the catalog of handlers compiled into the binary.
///
/// # Errors
///
/// Returns [`CatalogError`] when a key is registered twice.
pub fn builtin_catalog() -> Result<HandlerCatalog, CatalogError> {
    let mut catalog = HandlerCatalog::new();
    catalog.register(GREET_HANDLER, Arc::new(Greet))?;
    catalog.register(ECHO_HANDLER, Arc::new(Echo))?;
    catalog.register(CONFIG_HANDLER, Arc::new(ConfigView))?;
    Ok(catalog)
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Polite greeting.
struct Greet;

/// Parameters of [`Greet`].
const GREET_PARAMS: &[ParamSpec] =
    &[ParamSpec::required("nom"), ParamSpec::optional("titre", "Monsieur/Madame")];

#[async_trait]
impl ScriptHandler for Greet {
    fn params(&self) -> &[ParamSpec] {
        GREET_PARAMS
    }

    async fn invoke(&self, args: ScriptArgs, _env: &Environment) -> Result<Value, HandlerError> {
        let nom = args.require("nom")?;
        let titre = args.require("titre")?;
        Ok(json!({ "message": format!("Bonjour {titre} {nom} !") }))
    }
}

/// Echoes a message with request metadata.
struct Echo;

/// Parameters of [`Echo`].
const ECHO_PARAMS: &[ParamSpec] = &[ParamSpec::required("message")];

#[async_trait]
impl ScriptHandler for Echo {
    fn params(&self) -> &[ParamSpec] {
        ECHO_PARAMS
    }

    async fn invoke(&self, args: ScriptArgs, env: &Environment) -> Result<Value, HandlerError> {
        Ok(json!({
            "message": args.require("message")?,
            "request_id": env.request.request_id,
            "caller": env.caller,
        }))
    }
}

/// Reports the merged configuration visible to the invocation.
struct ConfigView;

#[async_trait]
impl ScriptHandler for ConfigView {
    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    async fn invoke(&self, _args: ScriptArgs, env: &Environment) -> Result<Value, HandlerError> {
        Ok(json!({ "config": env.vars() }))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
