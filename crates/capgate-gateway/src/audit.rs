// crates/capgate-gateway/src/audit.rs
// ============================================================================
// Module: Gateway Audit Logging
// Description: Structured audit events for invocations, guard, and registry.
// Purpose: Emit redacted JSON-line audit logs through pluggable sinks.
// Dependencies: capgate-config, capgate-scripts, serde, serde_json, sha2
// ============================================================================

//! ## Overview
//! Audit events are plain serializable structs written as one JSON object per
//! line. Three event families exist:
//! - `script_invocation`: exactly one [`InvocationRecord`] per dispatch that
//!   reaches authorization
//! - `guard`: ban starts, pre-check rejections, and operator unbans
//! - `registry`: reconciliation results and skipped units
//!
//! Token secrets never appear in events. Records carry the token id and a
//! SHA-256 fingerprint prefix instead.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use capgate_config::AuditConfig;
use capgate_core::ScriptName;
use capgate_core::hex_encode;
use capgate_scripts::ReconcileReport;
use capgate_scripts::RegistryError;
use capgate_scripts::ScriptRegistry;
use serde::Serialize;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Hex characters of the SHA-256 digest kept as a token fingerprint.
const FINGERPRINT_HEX_CHARS: usize = 16;

// ============================================================================
// SECTION: Invocation Records
// ============================================================================

/// Invocation outcome taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationOutcome {
    /// Handler returned a payload.
    Success,
    /// Request was rejected before the handler ran.
    Denied,
    /// Handler failed, timed out, or could not be loaded.
    Error,
    /// Caller went away while the handler was running.
    Cancelled,
}

/// Write-once invocation audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationRecord {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Request identifier.
    pub request_id: String,
    /// Client address when known.
    pub peer_ip: Option<String>,
    /// Target script name as requested.
    pub script: String,
    /// Outcome classification.
    pub outcome: InvocationOutcome,
    /// HTTP status returned to the caller.
    pub status: u16,
    /// Denial reason label.
    pub reason: Option<&'static str>,
    /// Resolved token identifier.
    pub token_id: Option<u64>,
    /// Fingerprint of the presented bearer token.
    pub token_fingerprint: Option<String>,
    /// Username of the token's creator.
    pub caller: Option<String>,
    /// Handler wall time in milliseconds.
    pub elapsed_ms: Option<u64>,
    /// Returned payload (success only, unless redacted).
    pub payload: Option<Value>,
    /// Internal failure description.
    pub error: Option<String>,
    /// Redaction classification for payload logging.
    pub redaction: &'static str,
}

/// Inputs required to construct an invocation record.
#[derive(Debug, Clone)]
pub struct InvocationRecordParams {
    /// Request identifier.
    pub request_id: String,
    /// Client address when known.
    pub peer_ip: Option<IpAddr>,
    /// Target script name as requested.
    pub script: String,
    /// Outcome classification.
    pub outcome: InvocationOutcome,
    /// HTTP status returned to the caller.
    pub status: u16,
    /// Denial reason label.
    pub reason: Option<&'static str>,
    /// Resolved token identifier.
    pub token_id: Option<u64>,
    /// Fingerprint of the presented bearer token.
    pub token_fingerprint: Option<String>,
    /// Username of the token's creator.
    pub caller: Option<String>,
    /// Handler wall time in milliseconds.
    pub elapsed_ms: Option<u64>,
    /// Returned payload.
    pub payload: Option<Value>,
    /// Internal failure description.
    pub error: Option<String>,
    /// Whether payloads may be written to the log.
    pub log_payloads: bool,
}

impl InvocationRecord {
    /// Creates an invocation record with a consistent timestamp.
    #[must_use]
    pub fn new(params: InvocationRecordParams) -> Self {
        let (payload, redaction) = match (params.payload, params.log_payloads) {
            (Some(payload), true) => (Some(payload), "payload"),
            (Some(_), false) => (None, "payload_redacted"),
            (None, _) => (None, "none"),
        };
        Self {
            event: "script_invocation",
            timestamp_ms: now_ms(),
            request_id: params.request_id,
            peer_ip: params.peer_ip.map(|ip| ip.to_string()),
            script: params.script,
            outcome: params.outcome,
            status: params.status,
            reason: params.reason,
            token_id: params.token_id,
            token_fingerprint: params.token_fingerprint,
            caller: params.caller,
            elapsed_ms: params.elapsed_ms,
            payload,
            error: params.error,
            redaction,
        }
    }
}

// ============================================================================
// SECTION: Guard Events
// ============================================================================

/// Guard action recorded in a [`GuardAuditEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardAction {
    /// A failure crossed the threshold and started a ban.
    BanStarted,
    /// A banned address was rejected by the pre-check.
    BanRejected,
    /// A deny-listed address was rejected by the pre-check.
    DenylistRejected,
    /// An operator lifted an active ban.
    Unbanned,
}

/// Abuse guard audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Request identifier.
    pub request_id: String,
    /// Guard action.
    pub action: GuardAction,
    /// Client address.
    pub peer_ip: String,
    /// Script name as requested.
    pub script: String,
}

impl GuardAuditEvent {
    /// Creates a guard event with a consistent timestamp.
    #[must_use]
    pub fn new(action: GuardAction, peer_ip: IpAddr, request_id: &str, script: &str) -> Self {
        Self {
            event: "guard",
            timestamp_ms: now_ms(),
            request_id: request_id.to_string(),
            action,
            peer_ip: peer_ip.to_string(),
            script: script.to_string(),
        }
    }
}

// ============================================================================
// SECTION: Registry Events
// ============================================================================

/// Registry reconciliation audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Severity label (`info`, `warn`, `error`).
    pub level: &'static str,
    /// Action label (`reconciled`, `unit_skipped`, `reconcile_failed`).
    pub action: &'static str,
    /// Unit path for skip events.
    pub path: Option<String>,
    /// Human-readable detail.
    pub detail: String,
    /// Scripts inserted.
    pub added: Vec<String>,
    /// Scripts deleted.
    pub removed: Vec<String>,
    /// Scripts whose path was corrected.
    pub updated: Vec<String>,
}

impl RegistryAuditEvent {
    /// Builds the events describing a completed reconciliation.
    #[must_use]
    pub fn from_report(report: &ReconcileReport) -> Vec<Self> {
        let timestamp_ms = now_ms();
        let mut events: Vec<Self> = report
            .skipped
            .iter()
            .map(|unit| Self {
                event: "registry",
                timestamp_ms,
                level: unit.reason.severity().as_str(),
                action: "unit_skipped",
                path: Some(unit.path.clone()),
                detail: unit.reason.describe(),
                added: Vec::new(),
                removed: Vec::new(),
                updated: Vec::new(),
            })
            .collect();
        let names = |list: &[ScriptName]| {
            list.iter().map(|name| name.as_str().to_string()).collect::<Vec<_>>()
        };
        let detail = if report.is_unchanged() {
            "registry already matches plugin tree".to_string()
        } else {
            format!(
                "added {}, removed {}, updated {}",
                report.added.len(),
                report.removed.len(),
                report.updated.len()
            )
        };
        events.push(Self {
            event: "registry",
            timestamp_ms,
            level: "info",
            action: "reconciled",
            path: None,
            detail,
            added: names(&report.added),
            removed: names(&report.removed),
            updated: names(&report.updated),
        });
        events
    }

    /// Builds the event describing a failed reconciliation.
    #[must_use]
    pub fn failure(error: &RegistryError) -> Self {
        Self {
            event: "registry",
            timestamp_ms: now_ms(),
            level: "error",
            action: "reconcile_failed",
            path: None,
            detail: format!("step {}: {error}", error.step()),
            added: Vec::new(),
            removed: Vec::new(),
            updated: Vec::new(),
        }
    }
}

/// Reconciles the registry and records the outcome on `audit`.
///
/// # Errors
///
/// Returns [`RegistryError`] naming the failing step; nothing was committed.
pub fn reconcile_with_audit(
    registry: &ScriptRegistry,
    audit: &dyn AuditSink,
) -> Result<ReconcileReport, RegistryError> {
    match registry.reconcile() {
        Ok(report) => {
            for event in RegistryAuditEvent::from_report(&report) {
                audit.record_registry(&event);
            }
            Ok(report)
        }
        Err(err) => {
            audit.record_registry(&RegistryAuditEvent::failure(&err));
            Err(err)
        }
    }
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Audit sink for gateway events.
pub trait AuditSink: Send + Sync {
    /// Record an invocation.
    fn record_invocation(&self, record: &InvocationRecord);

    /// Record a guard event.
    fn record_guard(&self, _event: &GuardAuditEvent) {}

    /// Record a registry event.
    fn record_registry(&self, _event: &RegistryAuditEvent) {}
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl StderrAuditSink {
    /// Writes one serialized event.
    fn emit<T: Serialize>(event: &T) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

impl AuditSink for StderrAuditSink {
    fn record_invocation(&self, record: &InvocationRecord) {
        Self::emit(record);
    }

    fn record_guard(&self, event: &GuardAuditEvent) {
        Self::emit(event);
    }

    fn record_registry(&self, event: &RegistryAuditEvent) {
        Self::emit(event);
    }
}

/// Audit sink that logs JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends one serialized event.
    ///
    /// A poisoned lock is recovered; a failed write falls back to stderr.
    fn emit<T: Serialize>(&self, event: &T) {
        let Ok(payload) = serde_json::to_string(event) else {
            return;
        };
        let written = {
            let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
            writeln!(file, "{payload}").and_then(|()| file.flush())
        };
        if written.is_err() {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

impl AuditSink for FileAuditSink {
    fn record_invocation(&self, record: &InvocationRecord) {
        self.emit(record);
    }

    fn record_guard(&self, event: &GuardAuditEvent) {
        self.emit(event);
    }

    fn record_registry(&self, event: &RegistryAuditEvent) {
        self.emit(event);
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record_invocation(&self, _record: &InvocationRecord) {}
}

/// Builds the sink selected by audit configuration.
///
/// # Errors
///
/// Returns an error when the audit file cannot be opened.
pub fn build_audit_sink(config: &AuditConfig) -> io::Result<Arc<dyn AuditSink>> {
    if !config.enabled {
        return Ok(Arc::new(NoopAuditSink));
    }
    match &config.path {
        Some(path) => Ok(Arc::new(FileAuditSink::new(Path::new(path.trim()))?)),
        None => Ok(Arc::new(StderrAuditSink)),
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns a short SHA-256 fingerprint of a bearer token.
#[must_use]
pub fn token_fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    hex_encode(&digest[.. FINGERPRINT_HEX_CHARS / 2])
}

/// Milliseconds since the Unix epoch.
fn now_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::panic, clippy::unwrap_used, reason = "Test-only assertions.")]

    use serde_json::json;

    use super::*;

    fn params(payload: Option<Value>, log_payloads: bool) -> InvocationRecordParams {
        InvocationRecordParams {
            request_id: "req-1".to_string(),
            peer_ip: None,
            script: "greet".to_string(),
            outcome: InvocationOutcome::Success,
            status: 200,
            reason: None,
            token_id: Some(7),
            token_fingerprint: Some(token_fingerprint("secret")),
            caller: Some("alice".to_string()),
            elapsed_ms: Some(3),
            payload,
            error: None,
            log_payloads,
        }
    }

    #[test]
    fn fingerprint_is_a_stable_hex_prefix() {
        let first = token_fingerprint("secret");
        assert_eq!(first.len(), FINGERPRINT_HEX_CHARS);
        assert_eq!(first, token_fingerprint("secret"));
        assert_ne!(first, token_fingerprint("secret2"));
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn payloads_are_redacted_on_request() {
        let record = InvocationRecord::new(params(Some(json!({"ok": true})), false));
        assert_eq!(record.payload, None);
        assert_eq!(record.redaction, "payload_redacted");
        let record = InvocationRecord::new(params(Some(json!({"ok": true})), true));
        assert_eq!(record.payload, Some(json!({"ok": true})));
    }

    #[test]
    fn records_serialize_without_secrets() {
        let record = InvocationRecord::new(params(None, true));
        let text = serde_json::to_string(&record).unwrap();
        assert!(text.contains("\"event\":\"script_invocation\""));
        assert!(text.contains("\"outcome\":\"success\""));
        assert!(!text.contains("\"secret\""));
    }

    #[test]
    fn file_sink_keeps_writing_after_a_poisoned_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let sink = Arc::new(FileAuditSink::new(&path).unwrap());
        let holder = Arc::clone(&sink);
        let _ = std::thread::spawn(move || {
            let _file = holder.file.lock().unwrap();
            panic!("writer panicked while holding the audit lock");
        })
        .join();
        assert!(sink.file.is_poisoned());

        sink.record_invocation(&InvocationRecord::new(params(None, true)));
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"request_id\":\"req-1\""));
    }
}
