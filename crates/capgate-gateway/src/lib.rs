// crates/capgate-gateway/src/lib.rs
// ============================================================================
// Module: Capgate Gateway Library
// Description: Dispatcher, audit sinks, and HTTP server for Capgate.
// Purpose: Serve capability scripts as authorized network endpoints.
// Dependencies: capgate-core, capgate-scripts, capgate-config, axum, tokio
// ============================================================================

//! ## Overview
//! The gateway wires the core decision logic to the network. The
//! [`Dispatcher`] owns the invocation pipeline and the translation from
//! internal failures to HTTP statuses; [`GatewayServer`] assembles it from
//! configuration and serves it over axum.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod auth;
pub mod dispatcher;
pub mod server;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditSink;
pub use audit::FileAuditSink;
pub use audit::GuardAction;
pub use audit::GuardAuditEvent;
pub use audit::InvocationOutcome;
pub use audit::InvocationRecord;
pub use audit::NoopAuditSink;
pub use audit::RegistryAuditEvent;
pub use audit::StderrAuditSink;
pub use audit::build_audit_sink;
pub use audit::reconcile_with_audit;
pub use audit::token_fingerprint;
pub use auth::parse_bearer;
pub use dispatcher::DispatchError;
pub use dispatcher::DispatchRequest;
pub use dispatcher::DispatchSettings;
pub use dispatcher::Dispatcher;
pub use server::GatewayError;
pub use server::GatewayServer;
pub use server::GatewayState;
pub use server::build_store;
pub use server::handle_invoke;
pub use server::handle_list_bans;
pub use server::handle_unban;
pub use server::parse_query;
pub use server::router;
