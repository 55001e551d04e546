// crates/capgate-gateway/tests/http.rs
// ============================================================================
// Module: HTTP Endpoint Tests
// Description: Invocation endpoint behavior through the axum handler.
// Purpose: Validate response bodies, headers, and transport extraction.
// Dependencies: capgate-gateway, capgate-config, axum, tokio
// ============================================================================

//! ## Overview
//! Calls [`handle_invoke`] and the ban admin handlers with constructed
//! extractors, plus server assembly from a `capgate.toml` configuration.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions."
)]

mod common;

use std::fs;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::to_bytes;
use axum::extract::ConnectInfo;
use axum::extract::Path;
use axum::extract::RawQuery;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::header::WWW_AUTHENTICATE;
use axum::response::Response;
use capgate_config::CapgateConfig;
use capgate_core::CidrBlock;
use capgate_core::FailureOutcome;
use capgate_core::GuardPolicy;
use capgate_core::ScriptName;
use capgate_gateway::GatewayServer;
use capgate_gateway::GatewayState;
use capgate_gateway::GuardAction;
use capgate_gateway::InvocationOutcome;
use capgate_gateway::handle_invoke;
use capgate_gateway::handle_list_bans;
use capgate_gateway::handle_unban;
use capgate_scripts::HandlerCatalog;
use common::SCOPED_SECRET;
use common::fixture;
use common::policy;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const PEER: ([u8; 4], u16) = ([127, 0, 0, 1], 40_000);

async fn call(
    state: &Arc<GatewayState>,
    script: &str,
    query: Option<&str>,
    headers: HeaderMap,
) -> (StatusCode, HeaderMap, Value) {
    let response: Response = handle_invoke(
        State(Arc::clone(state)),
        ConnectInfo(SocketAddr::from(PEER)),
        Path(script.to_string()),
        RawQuery(query.map(str::to_string)),
        headers,
    )
    .await;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, serde_json::from_slice(&bytes).unwrap())
}

async fn body_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn list_bans(
    state: &Arc<GatewayState>,
    peer: SocketAddr,
    headers: HeaderMap,
) -> (StatusCode, Value) {
    body_json(handle_list_bans(State(Arc::clone(state)), ConnectInfo(peer), headers).await).await
}

async fn unban(
    state: &Arc<GatewayState>,
    peer: SocketAddr,
    ip: &str,
    headers: HeaderMap,
) -> (StatusCode, Value) {
    let response =
        handle_unban(State(Arc::clone(state)), ConnectInfo(peer), Path(ip.to_string()), headers)
            .await;
    body_json(response).await
}

fn bearer(secret: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {secret}")).unwrap());
    headers
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[tokio::test]
async fn success_returns_the_payload_as_json() {
    let fx = fixture(policy(), Duration::from_secs(5));
    let state = Arc::new(GatewayState::new(fx.dispatcher.clone(), false, 1024));
    let (status, _, body) =
        call(&state, "greet", Some("nom=Paul&nom=Jean"), bearer(SCOPED_SECRET)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "Bonjour Monsieur/Madame Paul !" }));
}

#[tokio::test]
async fn errors_use_a_json_error_body() {
    let fx = fixture(policy(), Duration::from_secs(5));
    let state = Arc::new(GatewayState::new(fx.dispatcher.clone(), false, 1024));

    let (status, headers, body) = call(&state, "greet", Some("nom=Paul"), HeaderMap::new()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers.get(WWW_AUTHENTICATE).unwrap(), "Bearer");
    assert_eq!(body, json!({ "error": "authorization required" }));

    let (status, _, body) = call(&state, "fail", None, bearer(SCOPED_SECRET)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "an unexpected error occurred" }));

    let (status, _, body) = call(&state, "a/b", None, HeaderMap::new()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "invalid script name" }));
}

#[tokio::test]
async fn oversized_queries_are_rejected_and_recorded() {
    let fx = fixture(policy(), Duration::from_secs(5));
    let state = Arc::new(GatewayState::new(fx.dispatcher.clone(), false, 16));
    let query = format!("nom={}", "x".repeat(32));
    let (status, _, body) = call(&state, "greet", Some(&query), bearer(SCOPED_SECRET)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "query string too long" }));
    let records = fx.audit.invocations();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, InvocationOutcome::Denied);
    assert_eq!(records[0].reason, Some("query_too_long"));
}

#[tokio::test]
async fn banned_callers_with_oversized_queries_get_the_ban_notice() {
    let fx = fixture(policy(), Duration::from_secs(5));
    let state = Arc::new(GatewayState::new(fx.dispatcher.clone(), false, 16));
    for _ in 0..5 {
        let (status, _, _) = call(&state, "greet", Some("nom=x"), bearer("forged")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
    assert_eq!(fx.audit.invocations().len(), 5);

    let query = format!("nom={}", "x".repeat(32));
    let (status, _, body) = call(&state, "greet", Some(&query), bearer(SCOPED_SECRET)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "error": "access temporarily blocked" }));
    assert_eq!(fx.audit.invocations().len(), 5);
    let events = fx.audit.guard_events();
    assert_eq!(events.last().unwrap().action, GuardAction::BanRejected);
}

#[tokio::test]
async fn denylisted_callers_with_oversized_queries_are_not_recorded() {
    let policy = GuardPolicy {
        denylist: vec!["127.0.0.0/8".parse::<CidrBlock>().unwrap()],
        ..policy()
    };
    let fx = fixture(policy, Duration::from_secs(5));
    let state = Arc::new(GatewayState::new(fx.dispatcher.clone(), false, 16));
    let query = format!("nom={}", "x".repeat(32));
    let (status, _, body) = call(&state, "greet", Some(&query), bearer(SCOPED_SECRET)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "error": "access restricted" }));
    assert!(fx.audit.invocations().is_empty());
    assert_eq!(fx.audit.guard_events()[0].action, GuardAction::DenylistRejected);
}

#[tokio::test]
async fn request_ids_come_from_the_header_or_are_generated() {
    let fx = fixture(policy(), Duration::from_secs(5));
    let state = Arc::new(GatewayState::new(fx.dispatcher.clone(), false, 1024));

    let mut headers = bearer(SCOPED_SECRET);
    headers.insert("x-request-id", HeaderValue::from_static("trace-42"));
    let (_, _, body) = call(&state, "inspect", None, headers).await;
    assert_eq!(body["request_id"], json!("trace-42"));

    let (_, _, body) = call(&state, "inspect", None, bearer(SCOPED_SECRET)).await;
    assert!(body["request_id"].as_str().unwrap().starts_with("req-"));
}

#[tokio::test]
async fn forwarded_for_feeds_the_guard_only_when_trusted() {
    let fx = fixture(policy(), Duration::from_secs(5));
    let state = Arc::new(GatewayState::new(fx.dispatcher.clone(), true, 1024));
    let mut headers = bearer("forged");
    headers.insert("x-forwarded-for", HeaderValue::from_static("10.9.8.7, 203.0.113.5"));
    let (status, _, _) = call(&state, "greet", None, headers).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let guard = fx.dispatcher.guard().unwrap();
    assert_eq!(guard.failure_history_len(IpAddr::from([203, 0, 113, 5])), 1);
    assert_eq!(guard.failure_history_len(IpAddr::from([127, 0, 0, 1])), 0);
}

#[tokio::test]
async fn server_assembles_from_config_and_reconciles() {
    let dir = tempfile::tempdir().unwrap();
    let scripts = dir.path().join("scripts");
    fs::create_dir_all(scripts.join("a")).unwrap();
    fs::write(
        scripts.join("a/greet.toml"),
        "[[exports]]\nfunction = \"main\"\nhandler = \"test.salutation\"\nentrypoint = true\n",
    )
    .unwrap();
    let config = CapgateConfig::from_toml(&format!(
        "[server]\nbind = \"127.0.0.1:0\"\n[scripts]\nroot = {:?}\n[store]\ntype = \"sqlite\"\npath \
         = {:?}\n[audit]\nenabled = false\n",
        scripts.to_string_lossy(),
        dir.path().join("capgate.db").to_string_lossy(),
    ))
    .unwrap();
    let mut catalog = HandlerCatalog::new();
    catalog.register("test.salutation", Arc::new(common::Salutation)).unwrap();

    let server = GatewayServer::from_config(&config, Arc::new(catalog)).unwrap();
    let report = server.reconcile().await.unwrap();
    assert_eq!(report.added, vec![ScriptName::from("greet")]);
    assert!(server.reconcile().await.unwrap().is_unchanged());

    let state = server.state();
    let (status, _, body) = call(&state, "greet", Some("nom=Paul"), HeaderMap::new()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, json!({ "error": "script is offline" }));
}

#[tokio::test]
async fn server_rejects_invalid_config() {
    let mut config = CapgateConfig::default();
    config.server.bind = "not an address".to_string();
    let Err(err) = GatewayServer::from_config(&config, Arc::new(HandlerCatalog::new())) else {
        panic!("expected config error");
    };
    assert!(err.to_string().contains("invalid bind address"));
}

// ============================================================================
// SECTION: Ban Administration
// ============================================================================

#[tokio::test]
async fn operators_list_and_lift_bans_from_loopback() {
    let fx = fixture(policy(), Duration::from_secs(5));
    let state = Arc::new(GatewayState::new(fx.dispatcher.clone(), false, 1024));
    let offender = IpAddr::from([203, 0, 113, 5]);
    for _ in 0..4 {
        let _ = fx.guard.record_failure(offender);
    }
    assert_eq!(fx.guard.record_failure(offender), FailureOutcome::BanStarted);
    fx.clock.advance(Duration::from_secs(60));

    let local = SocketAddr::from(PEER);
    let (status, body) = list_bans(&state, local, HeaderMap::new()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "guard_enabled": true,
            "bans": [{ "addr": "203.0.113.5", "elapsed_secs": 60, "remaining_secs": 240 }],
        })
    );

    let (status, body) = unban(&state, local, "203.0.113.5", HeaderMap::new()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "addr": "203.0.113.5", "unbanned": true }));
    assert!(!fx.guard.check_banned(offender));
    assert_eq!(fx.guard.failure_history_len(offender), 0);
    let event = fx.audit.guard_events().pop().unwrap();
    assert_eq!(event.action, GuardAction::Unbanned);
    assert_eq!(event.peer_ip, "203.0.113.5");

    let (_, body) = unban(&state, local, "203.0.113.5", HeaderMap::new()).await;
    assert_eq!(body["unbanned"], json!(false));
    let (_, body) = list_bans(&state, local, HeaderMap::new()).await;
    assert_eq!(body["bans"], json!([]));
}

#[tokio::test]
async fn ban_administration_refuses_remote_and_proxied_callers() {
    let fx = fixture(policy(), Duration::from_secs(5));
    let state = Arc::new(GatewayState::new(fx.dispatcher.clone(), true, 1024));
    let remote = SocketAddr::from(([198, 51, 100, 7], 50_000));
    let forbidden = json!({ "error": "admin endpoints are loopback-only" });

    let (status, body) = list_bans(&state, remote, HeaderMap::new()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, forbidden);
    let (status, _) = unban(&state, remote, "203.0.113.5", HeaderMap::new()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let mut proxied = HeaderMap::new();
    proxied.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.7"));
    let (status, body) = list_bans(&state, SocketAddr::from(PEER), proxied).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, forbidden);

    let local = SocketAddr::from(PEER);
    let (status, body) = unban(&state, local, "not-an-ip", HeaderMap::new()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "invalid address" }));
    assert!(fx.audit.guard_events().is_empty());
}
