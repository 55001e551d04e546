// crates/capgate-gateway/src/dispatcher.rs
// ============================================================================
// Module: Dispatcher
// Description: Request-facing orchestration of guard, resolver, and handlers.
// Purpose: Turn one invocation request into a payload or a typed denial.
// Dependencies: capgate-core, capgate-scripts, axum (status codes), tokio
// ============================================================================

//! ## Overview
//! [`Dispatcher::dispatch`] runs the invocation pipeline:
//! 1. script name validation
//! 2. deny-list and ban pre-check (no registry access for rejected callers)
//! 3. authorization, recording abuse-signalling denials on the guard
//! 4. unit load and argument binding under the handler deadline
//! 5. handler execution on its own task inside an environment scope
//!
//! The dispatcher is the only place that maps failures to HTTP status codes.
//! Every request that passes the pre-check produces exactly one
//! [`InvocationRecord`], including requests whose future is dropped during
//! authorization, unit loading, or handler execution.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use capgate_core::AbuseGuard;
use capgate_core::AuthorizationResolver;
use capgate_core::DenyReason;
use capgate_core::FailureOutcome;
use capgate_core::Grant;
use capgate_core::RegistryStore;
use capgate_core::ScriptName;
use capgate_core::StoreError;
use capgate_core::Verdict;
use capgate_scripts::Environment;
use capgate_scripts::LoadedUnit;
use capgate_scripts::MissingArguments;
use capgate_scripts::RequestDescriptor;
use capgate_scripts::ScriptArgs;
use capgate_scripts::ScriptError;
use capgate_scripts::ScriptHandler;
use capgate_scripts::ScriptLoader;
use capgate_scripts::bind_arguments;
use capgate_scripts::environment;
use serde_json::Value;
use thiserror::Error;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::audit::AuditSink;
use crate::audit::GuardAction;
use crate::audit::GuardAuditEvent;
use crate::audit::InvocationOutcome;
use crate::audit::InvocationRecord;
use crate::audit::InvocationRecordParams;
use crate::audit::token_fingerprint;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default shared deadline for unit loading and handler execution.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);
/// Status recorded when the caller disconnects mid-invocation.
const CLIENT_CLOSED_REQUEST: u16 = 499;
/// Longest requested script name copied into audit records.
const MAX_LOGGED_NAME_CHARS: usize = 128;

// ============================================================================
// SECTION: Requests
// ============================================================================

/// One invocation request, already extracted from the transport.
#[derive(Clone, Default)]
pub struct DispatchRequest {
    /// Request identifier.
    pub request_id: String,
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Requested script name, untrusted.
    pub script: String,
    /// Decoded query parameters.
    pub query: BTreeMap<String, String>,
    /// Presented bearer token.
    pub bearer: Option<String>,
    /// Client address used for guard decisions.
    pub peer_ip: Option<IpAddr>,
}

impl fmt::Debug for DispatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRequest")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("script", &self.script)
            .field("query", &self.query)
            .field("bearer", &self.bearer.as_ref().map(|_| "<redacted>"))
            .field("peer_ip", &self.peer_ip)
            .finish()
    }
}

/// Dispatcher tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Shared deadline for unit loading and handler execution.
    pub handler_timeout: Duration,
    /// Whether success payloads are written to invocation records.
    pub log_payloads: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            log_payloads: true,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Dispatch failures, each mapped to one response status.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Script name failed validation.
    #[error("invalid script name")]
    InvalidScriptName,
    /// Raw query string exceeded the configured limit.
    #[error("query string too long")]
    QueryTooLong,
    /// Required entrypoint parameters were not supplied.
    #[error(transparent)]
    MissingArguments(#[from] MissingArguments),
    /// Authorization resolver denied the call.
    #[error("authorization denied: {}", .0.as_str())]
    Denied(DenyReason),
    /// Caller address is serving a ban.
    #[error("address is banned")]
    Banned,
    /// Caller address is on the deny list.
    #[error("address is deny-listed")]
    Denylisted,
    /// Registered unit is no longer on disk.
    #[error("unit missing: {0}")]
    UnitMissing(String),
    /// Handler failed, panicked, timed out, or could not be loaded.
    #[error("handler failure: {0}")]
    HandlerFailure(String),
    /// Registry or runtime failure outside the handler.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Returns the response status for this failure.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidScriptName | Self::QueryTooLong | Self::MissingArguments(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Denied(DenyReason::AuthRequired) => StatusCode::UNAUTHORIZED,
            Self::Denied(DenyReason::InvalidToken | DenyReason::Forbidden)
            | Self::Banned
            | Self::Denylisted => StatusCode::FORBIDDEN,
            Self::Denied(DenyReason::NotFound) | Self::UnitMissing(_) => StatusCode::NOT_FOUND,
            Self::Denied(DenyReason::Offline) => StatusCode::SERVICE_UNAVAILABLE,
            Self::HandlerFailure(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the message safe to show the caller.
    #[must_use]
    pub fn public_message(&self) -> String {
        let message = match self {
            Self::InvalidScriptName => "invalid script name",
            Self::QueryTooLong => "query string too long",
            Self::MissingArguments(missing) => return missing.to_string(),
            Self::Denied(DenyReason::NotFound) | Self::UnitMissing(_) => "script not found",
            Self::Denied(DenyReason::Offline) => "script is offline",
            Self::Denied(DenyReason::AuthRequired) => "authorization required",
            Self::Denied(DenyReason::InvalidToken) => "invalid or inactive token",
            Self::Denied(DenyReason::Forbidden) => "token does not grant access to this script",
            Self::Banned => "access temporarily blocked",
            Self::Denylisted => "access restricted",
            Self::HandlerFailure(_) | Self::Internal(_) => "an unexpected error occurred",
        };
        message.to_string()
    }

    /// Returns the stable label written to audit records.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::InvalidScriptName => "invalid_script_name",
            Self::QueryTooLong => "query_too_long",
            Self::MissingArguments(_) => "missing_arguments",
            Self::Denied(reason) => reason.as_str(),
            Self::Banned => "banned",
            Self::Denylisted => "denylisted",
            Self::UnitMissing(_) => "unit_missing",
            Self::HandlerFailure(_) => "handler_failure",
            Self::Internal(_) => "internal",
        }
    }
}

// ============================================================================
// SECTION: Dispatcher
// ============================================================================

/// Invocation pipeline shared by all request tasks.
#[derive(Clone)]
pub struct Dispatcher {
    /// Authorization resolver over the registry store.
    resolver: AuthorizationResolver,
    /// Registry store for caller lookups.
    store: Arc<dyn RegistryStore>,
    /// Unit loader over the plugin root.
    loader: ScriptLoader,
    /// Abuse guard; `None` disables bans and static lists.
    guard: Option<Arc<AbuseGuard>>,
    /// Audit sink for invocation and guard events.
    audit: Arc<dyn AuditSink>,
    /// Deadline and logging settings.
    settings: DispatchSettings,
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        store: Arc<dyn RegistryStore>,
        loader: ScriptLoader,
        guard: Option<Arc<AbuseGuard>>,
        audit: Arc<dyn AuditSink>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            resolver: AuthorizationResolver::new(Arc::clone(&store)),
            store,
            loader,
            guard,
            audit,
            settings,
        }
    }

    /// Returns the abuse guard, if enabled.
    #[must_use]
    pub fn guard(&self) -> Option<&AbuseGuard> {
        self.guard.as_deref()
    }

    /// Runs one invocation.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] describing why no payload was produced.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<Value, DispatchError> {
        let trace = Trace::new(&request, self.settings.log_payloads);
        let Ok(name) = ScriptName::parse(&request.script) else {
            return Err(self.deny(&trace, DispatchError::InvalidScriptName));
        };
        self.precheck(&request)?;

        let mut pending = Pending::arm(Arc::clone(&self.audit), trace);
        let result = self.run(&mut pending, name, request).await;
        pending.disarm();
        result
    }

    /// Runs authorization, loading, and invocation for a pre-checked request.
    ///
    /// Every return path writes the invocation record before returning.
    async fn run(
        &self,
        pending: &mut Pending,
        name: ScriptName,
        request: DispatchRequest,
    ) -> Result<Value, DispatchError> {
        pending.trace.token_fingerprint = request.bearer.as_deref().map(token_fingerprint);
        let (grant, caller) = match self.resolve(name, request.bearer.clone()).await {
            Ok((Verdict::Allow(grant), caller)) => (grant, caller),
            Ok((Verdict::Deny(reason), _)) => {
                self.record_abuse(&request, reason);
                return Err(self.deny(&pending.trace, DispatchError::Denied(reason)));
            }
            Err(err) => return Err(self.fail(&pending.trace, err)),
        };
        pending.trace.token_id = grant.token.as_ref().map(|token| token.id.get());
        pending.trace.caller.clone_from(&caller);

        let deadline = Instant::now() + self.settings.handler_timeout;
        let unit = match self.load(&grant.script.path, deadline).await {
            Ok(unit) => unit,
            Err(err) => return Err(self.fail(&pending.trace, err)),
        };
        let handler = Arc::clone(&unit.entrypoint.handler);
        let args = match bind_arguments(handler.params(), &request.query) {
            Ok(args) => args,
            Err(missing) => return Err(self.deny(&pending.trace, missing.into())),
        };
        let (token, token_config) = match grant.token {
            Some(token) => (Some(token.secret), token.config),
            None => (None, BTreeMap::new()),
        };
        let env = Arc::new(Environment {
            request: RequestDescriptor {
                request_id: request.request_id,
                method: request.method,
                path: request.path,
                query: request.query,
                peer_ip: request.peer_ip,
            },
            token,
            caller,
            script_config: unit.config,
            token_config,
        });
        self.invoke(pending, handler, args, env, deadline).await
    }

    /// Lifts an active ban on behalf of an operator.
    ///
    /// Returns true when a ban was lifted; the lift is audited.
    pub fn unban(&self, addr: IpAddr, request_id: &str) -> bool {
        let lifted = self.guard.as_deref().is_some_and(|guard| guard.unban(addr));
        if lifted {
            self.audit.record_guard(&GuardAuditEvent::new(
                GuardAction::Unbanned,
                addr,
                request_id,
                "",
            ));
        }
        lifted
    }

    /// Records a rejection made outside the pipeline (transport limits).
    #[must_use]
    pub fn reject(&self, request: &DispatchRequest, error: DispatchError) -> DispatchError {
        let trace = Trace::new(request, self.settings.log_payloads);
        self.deny(&trace, error)
    }

    /// Applies the deny list and ban pre-check.
    ///
    /// A rejection writes only the guard event, never an invocation record.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Denylisted`] or [`DispatchError::Banned`].
    pub fn precheck(&self, request: &DispatchRequest) -> Result<(), DispatchError> {
        let (Some(guard), Some(addr)) = (self.guard.as_deref(), request.peer_ip) else {
            return Ok(());
        };
        let rejection = if guard.is_denylisted(addr) {
            Some((GuardAction::DenylistRejected, DispatchError::Denylisted))
        } else if guard.check_banned(addr) {
            Some((GuardAction::BanRejected, DispatchError::Banned))
        } else {
            None
        };
        match rejection {
            Some((action, error)) => {
                self.audit.record_guard(&GuardAuditEvent::new(
                    action,
                    addr,
                    &request.request_id,
                    &request.script,
                ));
                Err(error)
            }
            None => Ok(()),
        }
    }

    /// Records a denial on the guard when it signals abuse.
    fn record_abuse(&self, request: &DispatchRequest, reason: DenyReason) {
        if !reason.counts_as_abuse() {
            return;
        }
        let (Some(guard), Some(addr)) = (self.guard.as_deref(), request.peer_ip) else {
            return;
        };
        if matches!(guard.record_failure(addr), FailureOutcome::BanStarted) {
            self.audit.record_guard(&GuardAuditEvent::new(
                GuardAction::BanStarted,
                addr,
                &request.request_id,
                &request.script,
            ));
        }
    }

    /// Resolves the verdict and the caller's username off the async runtime.
    async fn resolve(
        &self,
        name: ScriptName,
        bearer: Option<String>,
    ) -> Result<(Verdict, Option<String>), DispatchError> {
        let resolver = self.resolver.clone();
        let store = Arc::clone(&self.store);
        let joined = tokio::task::spawn_blocking(move || -> Result<_, StoreError> {
            let verdict = resolver.authorize(&name, bearer.as_deref())?;
            let caller = match &verdict {
                Verdict::Allow(Grant {
                    token: Some(token),
                    ..
                }) => store.principal(token.creator)?.map(|principal| principal.username),
                _ => None,
            };
            Ok((verdict, caller))
        })
        .await;
        match joined {
            Ok(Ok(resolved)) => Ok(resolved),
            Ok(Err(err)) => Err(DispatchError::Internal(err.to_string())),
            Err(err) => Err(DispatchError::Internal(format!("authorization task failed: {err}"))),
        }
    }

    /// Loads the registered unit under the shared deadline.
    async fn load(&self, path: &str, deadline: Instant) -> Result<LoadedUnit, DispatchError> {
        if path.trim().is_empty() {
            return Err(DispatchError::UnitMissing("no registered path".to_string()));
        }
        let loader = self.loader.clone();
        let relative = path.to_string();
        let task = tokio::task::spawn_blocking(move || loader.load(&relative));
        match tokio::time::timeout_at(deadline, task).await {
            Err(_) => Err(DispatchError::HandlerFailure("timeout".to_string())),
            Ok(Err(err)) => Err(DispatchError::Internal(format!("unit load task failed: {err}"))),
            Ok(Ok(Err(ScriptError::Missing(path)))) => Err(DispatchError::UnitMissing(path)),
            Ok(Ok(Err(err))) => Err(DispatchError::HandlerFailure(err.to_string())),
            Ok(Ok(Ok(unit))) => Ok(unit),
        }
    }

    /// Runs the handler on its own task and records the outcome.
    async fn invoke(
        &self,
        pending: &mut Pending,
        handler: Arc<dyn ScriptHandler>,
        args: ScriptArgs,
        env: Arc<Environment>,
        deadline: Instant,
    ) -> Result<Value, DispatchError> {
        pending.trace.started = Some(std::time::Instant::now());
        let task_env = Arc::clone(&env);
        let task = tokio::spawn(environment::scope(env, async move {
            handler.invoke(args, &task_env).await
        }));
        let abort = task.abort_handle();
        pending.abort = Some(abort.clone());
        let outcome = tokio::time::timeout_at(deadline, task).await;

        let result = match outcome {
            Err(_) => {
                abort.abort();
                Err(DispatchError::HandlerFailure("timeout".to_string()))
            }
            Ok(Err(join)) if join.is_panic() => {
                Err(DispatchError::HandlerFailure("handler panicked".to_string()))
            }
            Ok(Err(join)) => {
                Err(DispatchError::HandlerFailure(format!("handler task failed: {join}")))
            }
            Ok(Ok(Err(err))) => Err(DispatchError::HandlerFailure(err.to_string())),
            Ok(Ok(Ok(value))) => Ok(value),
        };
        match result {
            Ok(value) => {
                let payload = pending.trace.log_payloads.then(|| value.clone());
                self.audit.record_invocation(&pending.trace.record(
                    InvocationOutcome::Success,
                    StatusCode::OK.as_u16(),
                    None,
                    payload,
                    None,
                ));
                Ok(value)
            }
            Err(err) => Err(self.fail(&pending.trace, err)),
        }
    }

    /// Records a caller-side denial and returns the error.
    fn deny(&self, trace: &Trace, error: DispatchError) -> DispatchError {
        self.audit.record_invocation(&trace.record(
            InvocationOutcome::Denied,
            error.status().as_u16(),
            Some(error.label()),
            None,
            None,
        ));
        error
    }

    /// Records a failure with its internal detail and returns the error.
    fn fail(&self, trace: &Trace, error: DispatchError) -> DispatchError {
        self.audit.record_invocation(&trace.record(
            InvocationOutcome::Error,
            error.status().as_u16(),
            Some(error.label()),
            None,
            Some(error.to_string()),
        ));
        error
    }
}

// ============================================================================
// SECTION: Tracing
// ============================================================================

/// Fields accumulated for the invocation record.
struct Trace {
    /// Request identifier.
    request_id: String,
    /// Client address.
    peer_ip: Option<IpAddr>,
    /// Requested script name, truncated.
    script: String,
    /// Resolved token identifier.
    token_id: Option<u64>,
    /// Presented token fingerprint.
    token_fingerprint: Option<String>,
    /// Caller username.
    caller: Option<String>,
    /// Handler start time.
    started: Option<std::time::Instant>,
    /// Whether payloads may be logged.
    log_payloads: bool,
}

impl Trace {
    /// Starts a trace for `request`.
    fn new(request: &DispatchRequest, log_payloads: bool) -> Self {
        Self {
            request_id: request.request_id.clone(),
            peer_ip: request.peer_ip,
            script: request.script.chars().take(MAX_LOGGED_NAME_CHARS).collect(),
            token_id: None,
            token_fingerprint: None,
            caller: None,
            started: None,
            log_payloads,
        }
    }

    /// Builds the invocation record for an outcome.
    fn record(
        &self,
        outcome: InvocationOutcome,
        status: u16,
        reason: Option<&'static str>,
        payload: Option<Value>,
        error: Option<String>,
    ) -> InvocationRecord {
        let elapsed_ms = self
            .started
            .map(|started| u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));
        InvocationRecord::new(InvocationRecordParams {
            request_id: self.request_id.clone(),
            peer_ip: self.peer_ip,
            script: self.script.clone(),
            outcome,
            status,
            reason,
            token_id: self.token_id,
            token_fingerprint: self.token_fingerprint.clone(),
            caller: self.caller.clone(),
            elapsed_ms,
            payload,
            error,
            log_payloads: self.log_payloads,
        })
    }
}

/// Records cancellation if the request future is dropped while armed.
///
/// Armed once the pre-check passes; a spawned handler task is aborted too.
struct Pending {
    /// Sink for the cancellation record.
    audit: Arc<dyn AuditSink>,
    /// Fields accumulated so far.
    trace: Trace,
    /// Handle of the spawned handler task, once started.
    abort: Option<AbortHandle>,
    /// Cleared once the outcome has been recorded.
    armed: bool,
}

impl Pending {
    /// Arms the guard for a request that passed the pre-check.
    fn arm(audit: Arc<dyn AuditSink>, trace: Trace) -> Self {
        Self {
            audit,
            trace,
            abort: None,
            armed: true,
        }
    }

    /// Marks the invocation as settled.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
        self.audit.record_invocation(&self.trace.record(
            InvocationOutcome::Cancelled,
            CLIENT_CLOSED_REQUEST,
            Some("cancelled"),
            None,
            None,
        ));
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::use_debug, reason = "Test asserts on Debug output.")]

    use super::*;

    #[test]
    fn statuses_follow_the_error_taxonomy() {
        assert_eq!(DispatchError::InvalidScriptName.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            DispatchError::Denied(DenyReason::AuthRequired).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(DispatchError::Denied(DenyReason::Forbidden).status(), StatusCode::FORBIDDEN);
        assert_eq!(DispatchError::Banned.status(), StatusCode::FORBIDDEN);
        assert_eq!(DispatchError::Denied(DenyReason::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            DispatchError::Denied(DenyReason::Offline).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            DispatchError::HandlerFailure("boom".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_detail_never_reaches_the_caller() {
        let err = DispatchError::HandlerFailure("db password rejected".to_string());
        assert_eq!(err.public_message(), "an unexpected error occurred");
        let err = DispatchError::MissingArguments(MissingArguments(vec![
            "a".to_string(),
            "b".to_string(),
        ]));
        assert_eq!(err.public_message(), "missing required arguments: a, b");
    }

    #[test]
    fn request_debug_redacts_bearer() {
        let request = DispatchRequest {
            bearer: Some("s3cr3t".to_string()),
            ..DispatchRequest::default()
        };
        let rendered = format!("{request:?}");
        assert!(!rendered.contains("s3cr3t"));
    }
}
