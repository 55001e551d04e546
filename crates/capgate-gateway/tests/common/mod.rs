// crates/capgate-gateway/tests/common/mod.rs
// =============================================================================
// Module: Gateway Test Fixtures
// Description: Test handlers, a collecting audit sink, and a seeded gateway.
// Purpose: Share plugin-tree and registry setup across gateway suites.
// =============================================================================

#![allow(
    dead_code,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test helpers are selectively used across suites."
)]

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use capgate_core::AbuseGuard;
use capgate_core::AccessToken;
use capgate_core::CapabilityScript;
use capgate_core::GuardPolicy;
use capgate_core::InMemoryRegistryStore;
use capgate_core::ManualClock;
use capgate_core::Principal;
use capgate_core::PrincipalDraft;
use capgate_core::ReconcilePlan;
use capgate_core::RegistryStore;
use capgate_core::Role;
use capgate_core::ScriptName;
use capgate_core::ScriptUpdate;
use capgate_core::StoreError;
use capgate_core::TokenId;
use capgate_core::TokenDraft;
use capgate_core::TokenKind;
use capgate_core::UserId;
use capgate_gateway::AuditSink;
use capgate_gateway::DispatchSettings;
use capgate_gateway::Dispatcher;
use capgate_gateway::GuardAuditEvent;
use capgate_gateway::InvocationRecord;
use capgate_scripts::Environment;
use capgate_scripts::HandlerCatalog;
use capgate_scripts::HandlerError;
use capgate_scripts::ParamSpec;
use capgate_scripts::ScriptArgs;
use capgate_scripts::ScriptHandler;
use capgate_scripts::ScriptLoader;
use capgate_scripts::ScriptRegistry;
use capgate_scripts::environment;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Greets `nom` with an optional `titre`.
pub struct Salutation;

const SALUTATION_PARAMS: &[ParamSpec] =
    &[ParamSpec::required("nom"), ParamSpec::optional("titre", "Monsieur/Madame")];

#[async_trait]
impl ScriptHandler for Salutation {
    fn params(&self) -> &[ParamSpec] {
        SALUTATION_PARAMS
    }

    async fn invoke(&self, args: ScriptArgs, _env: &Environment) -> Result<Value, HandlerError> {
        let nom = args.require("nom")?;
        let titre = args.get("titre").unwrap_or_default();
        Ok(json!({ "message": format!("Bonjour {titre} {nom} !") }))
    }
}

/// Reports what it can see of its environment.
pub struct Inspect;

#[async_trait]
impl ScriptHandler for Inspect {
    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    async fn invoke(&self, _args: ScriptArgs, env: &Environment) -> Result<Value, HandlerError> {
        tokio::task::yield_now().await;
        let ambient = environment::current().map(|current| current.request.request_id.clone());
        Ok(json!({
            "request_id": env.request.request_id,
            "ambient_request_id": ambient,
            "caller": env.caller,
            "has_token": env.token.is_some(),
            "region": env.var("region"),
            "mode": env.var("mode"),
        }))
    }
}

/// Always fails with an internal detail.
pub struct Failing;

#[async_trait]
impl ScriptHandler for Failing {
    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    async fn invoke(&self, _args: ScriptArgs, _env: &Environment) -> Result<Value, HandlerError> {
        Err(HandlerError::Failed("upstream password rejected".to_string()))
    }
}

/// Panics when invoked.
pub struct Exploding;

#[async_trait]
impl ScriptHandler for Exploding {
    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    async fn invoke(&self, _args: ScriptArgs, _env: &Environment) -> Result<Value, HandlerError> {
        panic!("exploding handler");
    }
}

/// Sleeps long enough to be timed out or cancelled.
#[derive(Default)]
pub struct Sleepy {
    /// Set once the handler starts.
    pub started: AtomicBool,
    /// Set if the handler ever finishes.
    pub finished: AtomicBool,
}

#[async_trait]
impl ScriptHandler for Sleepy {
    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    async fn invoke(&self, _args: ScriptArgs, _env: &Environment) -> Result<Value, HandlerError> {
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(json!({ "slept": true }))
    }
}

// ============================================================================
// SECTION: Audit Sink
// ============================================================================

/// Audit sink keeping every event in memory.
#[derive(Default)]
pub struct CollectingSink {
    /// Invocation records.
    pub invocations: Mutex<Vec<InvocationRecord>>,
    /// Guard events.
    pub guard: Mutex<Vec<GuardAuditEvent>>,
}

impl CollectingSink {
    /// Returns a snapshot of invocation records.
    pub fn invocations(&self) -> Vec<InvocationRecord> {
        self.invocations.lock().unwrap().clone()
    }

    /// Returns a snapshot of guard events.
    pub fn guard_events(&self) -> Vec<GuardAuditEvent> {
        self.guard.lock().unwrap().clone()
    }
}

impl AuditSink for CollectingSink {
    fn record_invocation(&self, record: &InvocationRecord) {
        self.invocations.lock().unwrap().push(record.clone());
    }

    fn record_guard(&self, event: &GuardAuditEvent) {
        self.guard.lock().unwrap().push(event.clone());
    }
}

// ============================================================================
// SECTION: Store Faults
// ============================================================================

/// Registry store wrapper that slows or breaks selected lookups.
pub struct FaultyStore {
    /// Store every call is forwarded to.
    inner: Arc<InMemoryRegistryStore>,
    /// Blocking delay before each script lookup.
    script_delay: Option<Duration>,
    /// Fail token lookups by secret.
    fail_token_lookup: bool,
}

impl FaultyStore {
    /// Wraps a store without faults.
    pub fn new(inner: Arc<InMemoryRegistryStore>) -> Self {
        Self {
            inner,
            script_delay: None,
            fail_token_lookup: false,
        }
    }

    /// Delays every script lookup.
    pub fn with_script_delay(mut self, delay: Duration) -> Self {
        self.script_delay = Some(delay);
        self
    }

    /// Makes token lookups fail.
    pub fn failing_token_lookup(mut self) -> Self {
        self.fail_token_lookup = true;
        self
    }
}

impl RegistryStore for FaultyStore {
    fn script(&self, name: &ScriptName) -> Result<Option<CapabilityScript>, StoreError> {
        if let Some(delay) = self.script_delay {
            std::thread::sleep(delay);
        }
        self.inner.script(name)
    }

    fn scripts(&self) -> Result<Vec<CapabilityScript>, StoreError> {
        self.inner.scripts()
    }

    fn apply_reconciliation(&self, plan: &ReconcilePlan) -> Result<(), StoreError> {
        self.inner.apply_reconciliation(plan)
    }

    fn update_script(&self, name: &ScriptName, update: &ScriptUpdate) -> Result<bool, StoreError> {
        self.inner.update_script(name, update)
    }

    fn token_by_secret(&self, secret: &str) -> Result<Option<AccessToken>, StoreError> {
        if self.fail_token_lookup {
            return Err(StoreError::Io("token table unavailable".to_string()));
        }
        self.inner.token_by_secret(secret)
    }

    fn token(&self, id: TokenId) -> Result<Option<AccessToken>, StoreError> {
        self.inner.token(id)
    }

    fn insert_token(&self, draft: TokenDraft, secret: String) -> Result<AccessToken, StoreError> {
        self.inner.insert_token(draft, secret)
    }

    fn save_token(&self, token: &AccessToken) -> Result<(), StoreError> {
        self.inner.save_token(token)
    }

    fn delete_token(&self, id: TokenId) -> Result<bool, StoreError> {
        self.inner.delete_token(id)
    }

    fn principal(&self, id: UserId) -> Result<Option<Principal>, StoreError> {
        self.inner.principal(id)
    }

    fn principal_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError> {
        self.inner.principal_by_username(username)
    }

    fn insert_principal(&self, draft: PrincipalDraft) -> Result<Principal, StoreError> {
        self.inner.insert_principal(draft)
    }
}

// ============================================================================
// SECTION: Fixture
// ============================================================================

/// Secret of alice's scoped token (greet, inspect, fail, boom, slow).
pub const SCOPED_SECRET: &str = "scoped-secret";
/// Secret of alice's inactive token.
pub const INACTIVE_SECRET: &str = "inactive-secret";
/// Secret of a scoped token that only covers `greet`.
pub const NARROW_SECRET: &str = "narrow-secret";

/// Seeded gateway over a temporary plugin tree.
pub struct Fixture {
    /// Plugin root.
    pub dir: TempDir,
    /// Registry store.
    pub store: Arc<InMemoryRegistryStore>,
    /// Collected audit events.
    pub audit: Arc<CollectingSink>,
    /// Guard clock.
    pub clock: Arc<ManualClock>,
    /// Slow handler instance.
    pub sleepy: Arc<Sleepy>,
    /// Unit loader over the plugin root.
    pub loader: ScriptLoader,
    /// Abuse guard shared with the dispatcher.
    pub guard: Arc<AbuseGuard>,
    /// Dispatcher settings.
    pub settings: DispatchSettings,
    /// Dispatcher under test.
    pub dispatcher: Dispatcher,
}

impl Fixture {
    /// Sets script flags.
    pub fn set(&self, name: &str, is_public: Option<bool>, is_online: Option<bool>) {
        let update = ScriptUpdate {
            is_public,
            is_online,
            ..ScriptUpdate::default()
        };
        assert!(self.store.update_script(&ScriptName::from(name), &update).unwrap());
    }

    /// Builds a dispatcher over another store, sharing guard and audit.
    pub fn dispatcher_over(&self, store: Arc<dyn RegistryStore>) -> Dispatcher {
        Dispatcher::new(
            store,
            self.loader.clone(),
            Some(Arc::clone(&self.guard)),
            self.audit.clone(),
            self.settings,
        )
    }

    /// Returns the unit path for a script.
    pub fn unit_path(&self, relative: &str) -> std::path::PathBuf {
        self.dir.path().join(relative)
    }
}

fn unit(root: &Path, relative: &str, handler: &str, extra: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let body = format!(
        "description = \"{relative}\"\n{extra}\n[[exports]]\nfunction = \"main\"\nhandler = \
         \"{handler}\"\nentrypoint = true\n"
    );
    fs::write(path, body).unwrap();
}

/// Default guard policy used by the fixture.
pub fn policy() -> GuardPolicy {
    GuardPolicy {
        max_failures: 5,
        window: Duration::from_secs(300),
        ban_duration: Duration::from_secs(300),
        ..GuardPolicy::default()
    }
}

/// Builds a seeded fixture with every script online and private.
pub fn fixture(policy: GuardPolicy, handler_timeout: Duration) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    unit(root, "a/greet.toml", "test.salutation", "");
    unit(root, "tools/inspect.toml", "test.inspect", "[config]\nregion = \"script\"\nmode = \"script\"\n");
    unit(root, "fail.toml", "test.failing", "");
    unit(root, "boom.toml", "test.exploding", "");
    unit(root, "slow.toml", "test.sleepy", "");

    let sleepy = Arc::new(Sleepy::default());
    let mut catalog = HandlerCatalog::new();
    catalog.register("test.salutation", Arc::new(Salutation)).unwrap();
    catalog.register("test.inspect", Arc::new(Inspect)).unwrap();
    catalog.register("test.failing", Arc::new(Failing)).unwrap();
    catalog.register("test.exploding", Arc::new(Exploding)).unwrap();
    catalog.register("test.sleepy", sleepy.clone()).unwrap();
    let loader = ScriptLoader::new(root, Arc::new(catalog));

    let store = Arc::new(InMemoryRegistryStore::new());
    let report = ScriptRegistry::new(loader.clone(), store.clone()).reconcile().unwrap();
    assert_eq!(report.added.len(), 5);
    for name in ["greet", "inspect", "fail", "boom", "slow"] {
        let update = ScriptUpdate {
            is_online: Some(true),
            ..ScriptUpdate::default()
        };
        store.update_script(&ScriptName::from(name), &update).unwrap();
    }

    let alice = store
        .insert_principal(PrincipalDraft {
            username: "alice".to_string(),
            role: Role::User,
            all_access: true,
            permissions: BTreeSet::new(),
        })
        .unwrap();
    let all: BTreeSet<ScriptName> =
        ["greet", "inspect", "fail", "boom", "slow"].into_iter().map(ScriptName::from).collect();
    let draft = |name: &str, scripts: BTreeSet<ScriptName>| TokenDraft {
        name: name.to_string(),
        description: None,
        creator: alice.id,
        kind: TokenKind::Scoped,
        accessible_scripts: scripts,
        config: BTreeMap::from([("region".to_string(), "token".to_string())]),
    };
    store.insert_token(draft("scoped", all.clone()), SCOPED_SECRET.to_string()).unwrap();
    store
        .insert_token(
            draft("narrow", BTreeSet::from([ScriptName::from("greet")])),
            NARROW_SECRET.to_string(),
        )
        .unwrap();
    let mut inactive = store.insert_token(draft("old", all), INACTIVE_SECRET.to_string()).unwrap();
    inactive.is_active = false;
    store.save_token(&inactive).unwrap();

    let clock = Arc::new(ManualClock::new());
    let guard = Arc::new(AbuseGuard::with_clock(policy, clock.clone()));
    let audit = Arc::new(CollectingSink::default());
    let settings = DispatchSettings {
        handler_timeout,
        log_payloads: true,
    };
    let dispatcher =
        Dispatcher::new(store.clone(), loader.clone(), Some(guard.clone()), audit.clone(), settings);
    Fixture {
        dir,
        store,
        audit,
        clock,
        sleepy,
        loader,
        guard,
        settings,
        dispatcher,
    }
}
