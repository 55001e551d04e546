// crates/capgate-scripts/src/environment.rs
// ============================================================================
// Module: Environment Context
// Description: Request-scoped data visible to entrypoint code.
// Purpose: Carry request, caller, and configuration into handlers per task.
// Dependencies: capgate-core, serde, tokio
// ============================================================================

//! ## Overview
//! Handlers receive the [`Environment`] as an explicit argument. Helper code
//! deeper in a handler's call chain may read it through [`current`], which is
//! backed by a Tokio task-local slot installed by [`scope`].
//!
//! ## Invariants
//! - The slot is only populated while the future passed to [`scope`] is being
//!   polled; completion, error, panic, and drop all end it.
//! - Concurrent tasks never observe each other's value.
//! - The token secret is excluded from `Debug` output.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;

use capgate_core::ConfigMap;
use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Inbound request descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestDescriptor {
    /// Gateway-assigned request identifier.
    pub request_id: String,
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Parsed query parameters.
    pub query: BTreeMap<String, String>,
    /// Resolved client address.
    pub peer_ip: Option<IpAddr>,
}

/// Values available to entrypoint code for one invocation.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Environment {
    /// Inbound request.
    pub request: RequestDescriptor,
    /// Bearer token presented by the caller.
    pub token: Option<String>,
    /// Username of the token's creator.
    pub caller: Option<String>,
    /// Configuration attached to the script's unit.
    pub script_config: ConfigMap,
    /// Configuration attached to the token.
    pub token_config: ConfigMap,
}

impl Environment {
    /// Looks up a configuration value; token configuration wins over script
    /// configuration.
    #[must_use]
    pub fn var(&self, key: &str) -> Option<&str> {
        self.token_config.get(key).or_else(|| self.script_config.get(key)).map(String::as_str)
    }

    /// Returns the merged configuration mapping.
    #[must_use]
    pub fn vars(&self) -> ConfigMap {
        let mut merged = self.script_config.clone();
        merged.extend(self.token_config.iter().map(|(key, value)| (key.clone(), value.clone())));
        merged
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("request", &self.request)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("caller", &self.caller)
            .field("script_config", &self.script_config)
            .field("token_config", &self.token_config)
            .finish()
    }
}

// ============================================================================
// SECTION: Task-Local Scope
// ============================================================================

tokio::task_local! {
    /// Environment of the invocation currently polled on this task.
    static CURRENT: Arc<Environment>;
}

/// Runs `future` with `env` installed as the current environment.
pub async fn scope<F>(env: Arc<Environment>, future: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(env, future).await
}

/// Returns the environment of the enclosing [`scope`], if any.
#[must_use]
pub fn current() -> Option<Arc<Environment>> {
    CURRENT.try_with(Arc::clone).ok()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
