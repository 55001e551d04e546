// crates/capgate-gateway/src/server.rs
// ============================================================================
// Module: Gateway Server
// Description: Server assembly from configuration and the HTTP endpoint.
// Purpose: Serve `GET /api/{script_name}` and the ban admin routes over axum.
// Dependencies: capgate-config, capgate-core, capgate-scripts, axum, tokio, url
// ============================================================================

//! ## Overview
//! [`GatewayServer::from_config`] builds the registry store, audit sink,
//! abuse guard, unit loader, and [`Dispatcher`] from a validated
//! [`CapgateConfig`]. The HTTP layer only extracts transport data: client
//! address, bearer header, decoded query, and request id. Everything else is
//! decided by the dispatcher.
//!
//! `GET /admin/bans` and `POST /admin/bans/{ip}/unban` expose the abuse guard
//! to operators. They answer direct loopback connections only; a request
//! carrying `X-Forwarded-For` is refused even from loopback.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use axum::Json;
use axum::Router;
use axum::extract::ConnectInfo;
use axum::extract::Path;
use axum::extract::RawQuery;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::header::WWW_AUTHENTICATE;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use capgate_config::CapgateConfig;
use capgate_config::StoreConfig;
use capgate_config::StoreType;
use capgate_core::AbuseGuard;
use capgate_core::InMemoryRegistryStore;
use capgate_core::RegistryStore;
use capgate_scripts::HandlerCatalog;
use capgate_scripts::ReconcileReport;
use capgate_scripts::RegistryError;
use capgate_scripts::ScriptLoader;
use capgate_scripts::ScriptRegistry;
use capgate_store_sqlite::SqliteRegistryStore;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::audit::AuditSink;
use crate::audit::build_audit_sink;
use crate::audit::reconcile_with_audit;
use crate::auth::parse_bearer;
use crate::dispatcher::DispatchError;
use crate::dispatcher::DispatchRequest;
use crate::dispatcher::DispatchSettings;
use crate::dispatcher::Dispatcher;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Header carrying a caller-supplied request identifier.
const REQUEST_ID_HEADER: &str = "x-request-id";
/// Header carrying the proxy chain of client addresses.
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
/// Maximum accepted caller-supplied request id length.
const MAX_REQUEST_ID_BYTES: usize = 128;

// ============================================================================
// SECTION: Server
// ============================================================================

/// Gateway server instance.
pub struct GatewayServer {
    /// Socket address to bind.
    bind: SocketAddr,
    /// Shared handler state.
    state: Arc<GatewayState>,
    /// Registry reconciler over the plugin root.
    registry: ScriptRegistry,
    /// Audit sink shared with the dispatcher.
    audit: Arc<dyn AuditSink>,
    /// Reconcile before accepting connections.
    reconcile_on_start: bool,
}

impl GatewayServer {
    /// Builds a gateway from configuration and a compiled handler catalog.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when validation or initialization fails.
    pub fn from_config(
        config: &CapgateConfig,
        catalog: Arc<HandlerCatalog>,
    ) -> Result<Self, GatewayError> {
        config.validate().map_err(|err| GatewayError::Config(err.to_string()))?;
        let bind = config.server.bind_addr().map_err(|err| GatewayError::Config(err.to_string()))?;
        let store = build_store(&config.store)?;
        let audit = build_audit_sink(&config.audit)
            .map_err(|err| GatewayError::Init(format!("audit sink: {err}")))?;
        let guard = if config.guard.enabled {
            let policy =
                config.guard.policy().map_err(|err| GatewayError::Config(err.to_string()))?;
            Some(Arc::new(AbuseGuard::new(policy)))
        } else {
            None
        };
        let loader = ScriptLoader::new(config.scripts.root_path(), catalog);
        let registry = ScriptRegistry::new(loader.clone(), Arc::clone(&store));
        let dispatcher = Dispatcher::new(
            store,
            loader,
            guard,
            Arc::clone(&audit),
            DispatchSettings {
                handler_timeout: config.server.handler_timeout(),
                log_payloads: config.audit.log_payloads,
            },
        );
        let state = Arc::new(GatewayState::new(
            dispatcher,
            config.server.trust_forwarded_for,
            config.server.max_query_bytes,
        ));
        Ok(Self {
            bind,
            state,
            registry,
            audit,
            reconcile_on_start: config.scripts.reconcile_on_start,
        })
    }

    /// Returns the configured bind address.
    #[must_use]
    pub const fn bind_addr(&self) -> SocketAddr {
        self.bind
    }

    /// Returns the registry reconciler.
    #[must_use]
    pub const fn registry(&self) -> &ScriptRegistry {
        &self.registry
    }

    /// Returns the shared handler state.
    #[must_use]
    pub fn state(&self) -> Arc<GatewayState> {
        Arc::clone(&self.state)
    }

    /// Reconciles the registry, recording the outcome on the audit sink.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Registry`] naming the failing step.
    pub async fn reconcile(&self) -> Result<ReconcileReport, GatewayError> {
        let registry = self.registry.clone();
        let audit = Arc::clone(&self.audit);
        tokio::task::spawn_blocking(move || reconcile_with_audit(&registry, audit.as_ref()))
            .await
            .map_err(|err| GatewayError::Init(format!("reconcile task failed: {err}")))?
            .map_err(GatewayError::Registry)
    }

    /// Serves requests until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when startup reconciliation or the listener fails.
    pub async fn serve(self) -> Result<(), GatewayError> {
        if self.reconcile_on_start {
            self.reconcile().await?;
        }
        let listener = tokio::net::TcpListener::bind(self.bind)
            .await
            .map_err(|err| GatewayError::Transport(format!("http bind failed: {err}")))?;
        axum::serve(listener, router(self.state).into_make_service_with_connect_info::<SocketAddr>())
            .await
            .map_err(|err| GatewayError::Transport(format!("http server failed: {err}")))
    }
}

/// Builds the registry store selected by configuration.
///
/// # Errors
///
/// Returns [`GatewayError`] when the store cannot be opened.
pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn RegistryStore>, GatewayError> {
    match (config.store_type, config.sqlite()) {
        (StoreType::Memory, _) => Ok(Arc::new(InMemoryRegistryStore::new())),
        (StoreType::Sqlite, Some(sqlite)) => {
            let store = SqliteRegistryStore::new(&sqlite)
                .map_err(|err| GatewayError::Init(err.to_string()))?;
            Ok(Arc::new(store))
        }
        (StoreType::Sqlite, None) => {
            Err(GatewayError::Config("sqlite store requires path".to_string()))
        }
    }
}

// ============================================================================
// SECTION: HTTP Transport
// ============================================================================

/// Shared state for the HTTP handler.
pub struct GatewayState {
    /// Invocation pipeline.
    dispatcher: Dispatcher,
    /// Use the last `X-Forwarded-For` entry as the client address.
    trust_forwarded_for: bool,
    /// Maximum raw query string length in bytes.
    max_query_bytes: usize,
    /// Counter for generated request ids.
    next_request: AtomicU64,
}

impl GatewayState {
    /// Creates handler state.
    #[must_use]
    pub fn new(dispatcher: Dispatcher, trust_forwarded_for: bool, max_query_bytes: usize) -> Self {
        Self {
            dispatcher,
            trust_forwarded_for,
            max_query_bytes,
            next_request: AtomicU64::new(1),
        }
    }

    /// Returns the dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Returns the caller's request id when well formed, else a generated one.
    fn request_id(&self, headers: &HeaderMap) -> String {
        headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| {
                !value.is_empty()
                    && value.len() <= MAX_REQUEST_ID_BYTES
                    && value.bytes().all(|byte| byte.is_ascii_graphic())
            })
            .map_or_else(
                || format!("req-{}", self.next_request.fetch_add(1, Ordering::Relaxed)),
                str::to_string,
            )
    }
}

/// Builds the gateway router.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/api/{script_name}", get(handle_invoke))
        .route("/admin/bans", get(handle_list_bans))
        .route("/admin/bans/{ip}/unban", post(handle_unban))
        .with_state(state)
}

/// Handles `GET /api/{script_name}`.
pub async fn handle_invoke(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(script_name): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let raw_query = query.unwrap_or_default();
    let request = DispatchRequest {
        request_id: state.request_id(&headers),
        method: "GET".to_string(),
        path: format!("/api/{script_name}"),
        query: if raw_query.len() > state.max_query_bytes {
            BTreeMap::new()
        } else {
            parse_query(&raw_query)
        },
        script: script_name,
        bearer: parse_bearer(headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok())),
        peer_ip: Some(client_ip(peer.ip(), &headers, state.trust_forwarded_for)),
    };
    if raw_query.len() > state.max_query_bytes {
        let rejection = match state.dispatcher.precheck(&request) {
            Err(err) => err,
            Ok(()) => state.dispatcher.reject(&request, DispatchError::QueryTooLong),
        };
        return error_response(&rejection);
    }
    match state.dispatcher.dispatch(request).await {
        Ok(payload) => (StatusCode::OK, Json(payload)).into_response(),
        Err(err) => error_response(&err),
    }
}

/// Handles `GET /admin/bans`: lists active bans, loopback callers only.
pub async fn handle_list_bans(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if !admin_allowed(peer.ip(), &headers) {
        return admin_forbidden();
    }
    let Some(guard) = state.dispatcher.guard() else {
        return Json(json!({ "guard_enabled": false, "bans": [] })).into_response();
    };
    let bans: Vec<Value> = guard
        .banned()
        .iter()
        .map(|entry| {
            json!({
                "addr": entry.addr.to_string(),
                "elapsed_secs": entry.elapsed.as_secs(),
                "remaining_secs": entry.remaining.as_secs(),
            })
        })
        .collect();
    Json(json!({ "guard_enabled": true, "bans": bans })).into_response()
}

/// Handles `POST /admin/bans/{ip}/unban`: lifts a ban, loopback callers only.
pub async fn handle_unban(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(ip): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !admin_allowed(peer.ip(), &headers) {
        return admin_forbidden();
    }
    let Ok(addr) = ip.trim().parse::<IpAddr>() else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid address" })))
            .into_response();
    };
    let unbanned = state.dispatcher.unban(addr, &state.request_id(&headers));
    Json(json!({ "addr": addr.to_string(), "unbanned": unbanned })).into_response()
}

/// Admin routes accept direct loopback connections only, never proxied ones.
fn admin_allowed(peer: IpAddr, headers: &HeaderMap) -> bool {
    peer.to_canonical().is_loopback() && !headers.contains_key(FORWARDED_FOR_HEADER)
}

/// Response for admin calls from non-loopback callers.
fn admin_forbidden() -> Response {
    (StatusCode::FORBIDDEN, Json(json!({ "error": "admin endpoints are loopback-only" })))
        .into_response()
}

/// Decodes a query string, keeping the first occurrence of repeated keys.
#[must_use]
pub fn parse_query(raw: &str) -> BTreeMap<String, String> {
    let mut query = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        query.entry(key.into_owned()).or_insert_with(|| value.into_owned());
    }
    query
}

/// Resolves the client address used for guard decisions.
fn client_ip(peer: IpAddr, headers: &HeaderMap, trust_forwarded_for: bool) -> IpAddr {
    if !trust_forwarded_for {
        return peer;
    }
    headers
        .get_all(FORWARDED_FOR_HEADER)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .last()
        .and_then(|entry| entry.trim().parse().ok())
        .unwrap_or(peer)
}

/// Builds the JSON error response for a dispatch failure.
fn error_response(err: &DispatchError) -> Response {
    let status = err.status();
    let body = Json(json!({ "error": err.public_message() }));
    if status == StatusCode::UNAUTHORIZED {
        return (status, [(WWW_AUTHENTICATE, "Bearer")], body).into_response();
    }
    (status, body).into_response()
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Gateway startup and transport errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Registry reconciliation failed.
    #[error(transparent)]
    Registry(RegistryError),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Tests
// ============================================================================
