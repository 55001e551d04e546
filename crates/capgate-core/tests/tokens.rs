// crates/capgate-core/tests/tokens.rs
// ============================================================================
// Module: Token Administration Tests
// Description: Minting and lifecycle rules over the in-memory store.
// Purpose: Ensure principal permissions gate which tokens can be minted.
// Dependencies: capgate-core
// ============================================================================

//! ## Overview
//! Exercises [`TokenAdmin`] against [`InMemoryRegistryStore`] with a small
//! registry of three scripts.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions."
)]

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use capgate_core::InMemoryRegistryStore;
use capgate_core::MintRequest;
use capgate_core::Principal;
use capgate_core::PrincipalDraft;
use capgate_core::ReconcilePlan;
use capgate_core::RegistryStore;
use capgate_core::Role;
use capgate_core::ScriptName;
use capgate_core::TokenAdmin;
use capgate_core::TokenKind;
use capgate_core::TokenPolicyError;

struct Fixture {
    store: Arc<InMemoryRegistryStore>,
    admin: TokenAdmin,
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryRegistryStore::new());
    let plan = ReconcilePlan {
        to_add: ["greet", "lookup", "report"]
            .into_iter()
            .map(|name| (ScriptName::from(name), format!("{name}.toml")))
            .collect(),
        ..ReconcilePlan::default()
    };
    store.apply_reconciliation(&plan).unwrap();
    let admin = TokenAdmin::new(store.clone());
    Fixture {
        store,
        admin,
    }
}

fn principal(store: &InMemoryRegistryStore, name: &str, role: Role, all: bool, perms: &[&str]) -> Principal {
    store
        .insert_principal(PrincipalDraft {
            username: name.to_string(),
            role,
            all_access: all,
            permissions: names(perms),
        })
        .unwrap()
}

fn names(values: &[&str]) -> BTreeSet<ScriptName> {
    values.iter().map(|value| ScriptName::from(*value)).collect()
}

fn request(kind: TokenKind, scripts: &[&str]) -> MintRequest {
    MintRequest {
        name: "ci".to_string(),
        description: None,
        kind,
        scripts: names(scripts),
        config: BTreeMap::new(),
    }
}

#[test]
fn universal_tokens_require_admin() {
    let fx = fixture();
    let user = principal(&fx.store, "alice", Role::User, true, &[]);
    let admin = principal(&fx.store, "root", Role::Admin, false, &[]);
    assert!(matches!(
        fx.admin.mint(&user, request(TokenKind::Universal, &[])),
        Err(TokenPolicyError::UniversalRequiresAdmin)
    ));
    let token = fx.admin.mint(&admin, request(TokenKind::Universal, &["greet"])).unwrap();
    assert_eq!(token.kind, TokenKind::Universal);
    assert!(token.accessible_scripts.is_empty());
    assert_eq!(token.secret.len(), 64);
    assert!(token.is_active);
}

#[test]
fn scoped_tokens_need_scripts_within_permissions() {
    let fx = fixture();
    let user = principal(&fx.store, "bob", Role::User, false, &["greet"]);
    assert!(matches!(
        fx.admin.mint(&user, request(TokenKind::Scoped, &[])),
        Err(TokenPolicyError::EmptyScope)
    ));
    assert!(matches!(
        fx.admin.mint(&user, request(TokenKind::Scoped, &["greet", "lookup"])),
        Err(TokenPolicyError::ScriptsNotPermitted(denied)) if denied == "lookup"
    ));
    assert!(matches!(
        fx.admin.mint(&user, request(TokenKind::Scoped, &["ghost"])),
        Err(TokenPolicyError::UnknownScripts(unknown)) if unknown == "ghost"
    ));
    let token = fx.admin.mint(&user, request(TokenKind::Scoped, &["greet"])).unwrap();
    assert_eq!(token.accessible_scripts, names(&["greet"]));
    assert_eq!(token.creator, user.id);
}

#[test]
fn all_access_principal_may_pick_any_script() {
    let fx = fixture();
    let user = principal(&fx.store, "carol", Role::User, true, &[]);
    let token =
        fx.admin.mint(&user, request(TokenKind::Scoped, &["greet", "lookup", "report"])).unwrap();
    assert_eq!(token.accessible_scripts.len(), 3);
}

#[test]
fn inactive_principal_cannot_mint() {
    let fx = fixture();
    let mut user = principal(&fx.store, "dave", Role::Admin, true, &[]);
    user.is_active = false;
    assert!(matches!(
        fx.admin.mint(&user, request(TokenKind::Universal, &[])),
        Err(TokenPolicyError::InactivePrincipal)
    ));
}

#[test]
fn only_creator_or_admin_may_manage_tokens() {
    let fx = fixture();
    let owner = principal(&fx.store, "erin", Role::User, true, &[]);
    let other = principal(&fx.store, "frank", Role::User, true, &[]);
    let admin = principal(&fx.store, "root", Role::Admin, false, &[]);
    let token = fx.admin.mint(&owner, request(TokenKind::Scoped, &["greet"])).unwrap();

    assert!(matches!(
        fx.admin.set_active(&other, token.id, false),
        Err(TokenPolicyError::NotOwner(id)) if id == token.id
    ));
    let renamed = fx.admin.rename(&owner, token.id, " deploy ", Some("ci".to_string())).unwrap();
    assert_eq!(renamed.name, "deploy");
    let toggled = fx.admin.set_active(&admin, token.id, false).unwrap();
    assert!(!toggled.is_active);
    assert!(!fx.store.token(token.id).unwrap().unwrap().is_active);

    assert!(matches!(fx.admin.delete(&other, token.id), Err(TokenPolicyError::NotOwner(_))));
    fx.admin.delete(&owner, token.id).unwrap();
    assert!(fx.store.token(token.id).unwrap().is_none());
    assert!(fx.store.principal(owner.id).unwrap().is_some());
    assert!(matches!(
        fx.admin.delete(&owner, token.id),
        Err(TokenPolicyError::TokenNotFound(_))
    ));
}

#[test]
fn rescope_reapplies_minting_rules() {
    let fx = fixture();
    let user = principal(&fx.store, "gina", Role::User, false, &["greet", "lookup"]);
    let token = fx.admin.mint(&user, request(TokenKind::Scoped, &["greet"])).unwrap();
    assert!(matches!(
        fx.admin.rescope(&user, token.id, TokenKind::Universal, BTreeSet::new()),
        Err(TokenPolicyError::UniversalRequiresAdmin)
    ));
    assert!(matches!(
        fx.admin.rescope(&user, token.id, TokenKind::Scoped, names(&["report"])),
        Err(TokenPolicyError::ScriptsNotPermitted(_))
    ));
    let rescoped =
        fx.admin.rescope(&user, token.id, TokenKind::Scoped, names(&["lookup"])).unwrap();
    assert_eq!(rescoped.accessible_scripts, names(&["lookup"]));
}

#[test]
fn removed_scripts_drop_out_of_token_scopes() {
    let fx = fixture();
    let admin = principal(&fx.store, "root", Role::Admin, false, &[]);
    let token = fx.admin.mint(&admin, request(TokenKind::Scoped, &["greet", "report"])).unwrap();
    let plan = ReconcilePlan {
        to_remove: names(&["report"]),
        ..ReconcilePlan::default()
    };
    fx.store.apply_reconciliation(&plan).unwrap();
    let stored = fx.store.token(token.id).unwrap().unwrap();
    assert_eq!(stored.accessible_scripts, names(&["greet"]));
}
