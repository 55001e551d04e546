// crates/capgate-cli/src/serve_policy.rs
// ============================================================================
// Module: Serve Policy
// Description: Network exposure policy checks for the gateway launcher.
// Purpose: Enforce loopback-by-default binds with explicit opt-in.
// Dependencies: capgate-config, std
// ============================================================================

//! ## Overview
//! Binding the gateway to a non-loopback address requires either the
//! `--allow-non-loopback` flag or `CAPGATE_ALLOW_NON_LOOPBACK` set to a truthy
//! value. The policy is fail-closed: an unparseable environment value is an
//! error, not a refusal to opt in.

use std::env;
use std::net::SocketAddr;

use capgate_config::CapgateConfig;

use crate::t;

/// Environment variable enabling non-loopback binds.
pub const ALLOW_NON_LOOPBACK_ENV: &str = "CAPGATE_ALLOW_NON_LOOPBACK";

/// Bind outcome metadata for exposure warnings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOutcome {
    /// Parsed bind address.
    pub bind_addr: SocketAddr,
    /// True when bound to a non-loopback address.
    pub network_exposed: bool,
    /// Whether the abuse guard is enabled.
    pub guard_enabled: bool,
    /// Whether audit logging is enabled.
    pub audit_enabled: bool,
    /// Whether `X-Forwarded-For` is trusted.
    pub trust_forwarded_for: bool,
}

/// Serve policy failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServePolicyError {
    /// Environment variable was set to an invalid value.
    InvalidEnv {
        /// Raw environment value.
        value: String,
    },
    /// Bind string failed to parse.
    InvalidBind {
        /// Raw bind value.
        bind: String,
        /// Parse error message.
        error: String,
    },
    /// Non-loopback binding requires explicit opt-in.
    NonLoopbackOptInRequired {
        /// Bind address.
        bind: String,
    },
}

impl std::fmt::Display for ServePolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::InvalidEnv {
                value,
            } => t!("serve.bind.allow_env_invalid", env = ALLOW_NON_LOOPBACK_ENV, value = value),
            Self::InvalidBind {
                bind,
                error,
            } => t!("serve.bind.parse_failed", bind = bind, error = error),
            Self::NonLoopbackOptInRequired {
                bind,
            } => t!("serve.bind.non_loopback_opt_in", bind = bind, env = ALLOW_NON_LOOPBACK_ENV),
        };
        write!(f, "{message}")
    }
}

impl std::error::Error for ServePolicyError {}

/// Resolves the non-loopback opt-in from the CLI flag and environment.
///
/// # Errors
/// Returns [`ServePolicyError::InvalidEnv`] when the environment value is invalid.
pub fn resolve_allow_non_loopback(flag: bool) -> Result<bool, ServePolicyError> {
    if flag {
        return Ok(true);
    }
    let Some(value) = env::var_os(ALLOW_NON_LOOPBACK_ENV) else {
        return Ok(false);
    };
    parse_allow_non_loopback_value(&value.to_string_lossy())
}

/// Enforces the loopback-only default for the configured bind address.
///
/// # Errors
/// Returns [`ServePolicyError`] when the bind is invalid or not opted in.
pub fn enforce_local_only(
    config: &CapgateConfig,
    allow_non_loopback: bool,
) -> Result<BindOutcome, ServePolicyError> {
    let bind = config.server.bind.as_str();
    let bind_addr: SocketAddr =
        bind.parse().map_err(|err: std::net::AddrParseError| ServePolicyError::InvalidBind {
            bind: bind.to_string(),
            error: err.to_string(),
        })?;
    let network_exposed = !bind_addr.ip().is_loopback();
    if network_exposed && !allow_non_loopback {
        return Err(ServePolicyError::NonLoopbackOptInRequired {
            bind: bind.to_string(),
        });
    }
    Ok(BindOutcome {
        bind_addr,
        network_exposed,
        guard_enabled: config.guard.enabled,
        audit_enabled: config.audit.enabled,
        trust_forwarded_for: config.server.trust_forwarded_for,
    })
}

/// Parses a bool-ish string (true/false/1/0/yes/no/on/off).
fn parse_boolish(value: &str) -> Option<bool> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Parses an env value for allow-non-loopback.
fn parse_allow_non_loopback_value(value: &str) -> Result<bool, ServePolicyError> {
    parse_boolish(value).ok_or_else(|| ServePolicyError::InvalidEnv {
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::expect_used,
        reason = "Test helpers use expect/expect_err for concise failure messages."
    )]

    use capgate_config::CapgateConfig;

    use super::ServePolicyError;
    use super::enforce_local_only;
    use super::parse_allow_non_loopback_value;

    fn config_with_bind(bind: &str) -> CapgateConfig {
        let mut config = CapgateConfig::default();
        config.server.bind = bind.to_string();
        config
    }

    #[test]
    fn loopback_is_allowed_without_opt_in() {
        let outcome = enforce_local_only(&config_with_bind("127.0.0.1:8080"), false)
            .expect("loopback allowed");
        assert!(!outcome.network_exposed);
        let outcome =
            enforce_local_only(&config_with_bind("[::1]:8080"), false).expect("ipv6 loopback");
        assert!(!outcome.network_exposed);
    }

    #[test]
    fn non_loopback_requires_opt_in() {
        let err = enforce_local_only(&config_with_bind("0.0.0.0:8080"), false)
            .expect_err("expected opt-in error");
        assert!(matches!(err, ServePolicyError::NonLoopbackOptInRequired { .. }));
        assert!(err.to_string().contains("CAPGATE_ALLOW_NON_LOOPBACK"));
    }

    #[test]
    fn non_loopback_with_opt_in_reports_exposure() {
        let mut config = config_with_bind("0.0.0.0:8080");
        config.guard.enabled = false;
        let outcome = enforce_local_only(&config, true).expect("opted in");
        assert!(outcome.network_exposed);
        assert!(!outcome.guard_enabled);
        assert!(outcome.audit_enabled);
    }

    #[test]
    fn invalid_bind_is_rejected() {
        let err = enforce_local_only(&config_with_bind("localhost"), true)
            .expect_err("expected bind error");
        assert!(matches!(err, ServePolicyError::InvalidBind { .. }));
    }

    #[test]
    fn parse_allow_non_loopback_accepts_truthy_values() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_allow_non_loopback_value(value).expect("parse env"));
        }
        assert!(!parse_allow_non_loopback_value("off").expect("parse env"));
    }

    #[test]
    fn parse_allow_non_loopback_rejects_invalid() {
        let err = parse_allow_non_loopback_value("maybe").expect_err("expected invalid env");
        assert!(matches!(err, ServePolicyError::InvalidEnv { .. }));
    }
}
