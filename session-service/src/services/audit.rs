//! Audit recorder.
//!
//! Writes are spawned onto a task tracker and never awaited by the request
//! that produced them. A failed insert is logged and dropped.

use chrono::Utc;
use serde_json::{Map, Value};
use service_core::axum::http::{Extensions, HeaderMap, Method, Uri};
use service_core::middleware::rate_limit::client_ip;
use service_core::middleware::tracing::RequestId;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::store::AuditStore;
use crate::models::{AuditAction, AuditLogEntry, Severity};

pub const REDACTED: &str = "[REDACTED]";
pub const TRUNCATED: &str = "[Truncated]";

/// Nesting deeper than this is replaced with `TRUNCATED`.
pub const MAX_METADATA_DEPTH: usize = 16;

const SENSITIVE_KEY_FRAGMENTS: [&str; 5] = ["password", "token", "secret", "privatekey", "apikey"];

/// Request attributes copied onto every audit entry.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub method: String,
    pub path: String,
}

impl RequestMeta {
    pub fn from_http(
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        extensions: &Extensions,
        trust_forwarded_for: bool,
    ) -> Self {
        Self {
            ip: client_ip(headers, extensions, trust_forwarded_for).map(|ip| ip.to_string()),
            user_agent: headers
                .get(service_core::axum::http::header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(|ua| ua.chars().take(512).collect()),
            request_id: extensions
                .get::<RequestId>()
                .map(|id| id.as_str().to_string()),
            method: method.to_string(),
            path: uri.path().to_string(),
        }
    }
}

/// A security event on its way to the audit store.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    action: AuditAction,
    account_id: Option<Uuid>,
    message: Option<String>,
    metadata: Map<String, Value>,
    severity: Option<Severity>,
    ip: Option<String>,
    user_agent: Option<String>,
    request_id: Option<String>,
}

impl AuditEvent {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            account_id: None,
            message: None,
            metadata: Map::new(),
            severity: None,
            ip: None,
            user_agent: None,
            request_id: None,
        }
    }

    pub fn action(&self) -> AuditAction {
        self.action
    }

    pub fn account(mut self, account_id: Uuid) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn maybe_account(mut self, account_id: Option<Uuid>) -> Self {
        self.account_id = account_id;
        self
    }

    pub fn request(mut self, meta: &RequestMeta) -> Self {
        self.ip = meta.ip.clone();
        self.user_agent = meta.user_agent.clone();
        self.request_id = meta.request_id.clone();
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Merge caller-supplied metadata. Non-object values land under `"value"`.
    pub fn metadata(mut self, metadata: Value) -> Self {
        match metadata {
            Value::Object(map) => self.metadata.extend(map),
            Value::Null => {}
            other => {
                self.metadata.insert("value".to_string(), other);
            }
        }
        self
    }

    pub fn reason(self, reason: &str) -> Self {
        self.meta("reason", reason)
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Build the row to persist: metadata redacted, severity resolved.
    pub fn into_entry(self) -> AuditLogEntry {
        let severity = self
            .severity
            .or_else(|| {
                self.metadata
                    .get("severity")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok())
            })
            .unwrap_or_default();

        AuditLogEntry {
            audit_id: Uuid::new_v4(),
            action: self.action.as_str().to_string(),
            account_id: self.account_id,
            ip_address: self.ip,
            user_agent: self.user_agent,
            message: self.message,
            metadata: redact(&Value::Object(self.metadata)),
            severity: severity.as_str().to_string(),
            request_id: self.request_id,
            created_utc: Utc::now(),
        }
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| normalized.contains(fragment))
}

/// Replace values under sensitive keys at any depth.
pub fn redact(value: &Value) -> Value {
    redact_at(value, 0)
}

fn redact_at(value: &Value, depth: usize) -> Value {
    if depth >= MAX_METADATA_DEPTH {
        return Value::String(TRUNCATED.to_string());
    }
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| {
                    let v = if is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_at(v, depth + 1)
                    };
                    (key.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| redact_at(v, depth + 1)).collect())
        }
        other => other.clone(),
    }
}

#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    tracker: TaskTracker,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            tracker: TaskTracker::new(),
        }
    }

    /// Queue `event` for persistence. Never fails and never blocks the caller.
    pub fn record(&self, event: AuditEvent) {
        let entry = event.into_entry();
        tracing::info!(
            action = %entry.action,
            severity = %entry.severity,
            account_id = ?entry.account_id,
            request_id = ?entry.request_id,
            "Audit event"
        );

        let store = self.store.clone();
        self.tracker.spawn(async move {
            if let Err(e) = store.insert(&entry).await {
                tracing::error!(
                    error = %e,
                    action = %entry.action,
                    audit_id = %entry.audit_id,
                    "Failed to write audit log"
                );
            }
        });
    }

    /// Record by action name. Names outside the taxonomy are dropped with a warning.
    pub fn record_named(
        &self,
        action: &str,
        account_id: Option<Uuid>,
        request: Option<&RequestMeta>,
        metadata: Option<Value>,
    ) {
        let action = match action.parse::<AuditAction>() {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping audit event with unknown action");
                return;
            }
        };

        let mut event = AuditEvent::new(action).maybe_account(account_id);
        if let Some(request) = request {
            event = event.request(request);
        }
        if let Some(metadata) = metadata {
            event = event.metadata(metadata);
        }
        self.record(event);
    }

    /// Wait for every write queued so far.
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::InMemoryStore;
    use serde_json::json;

    #[test]
    fn sensitive_keys_are_redacted_at_any_depth() {
        let redacted = redact(&json!({
            "Password": "hunter2",
            "nested": { "id_token": "abc", "Private Key": "-----BEGIN", "kept": 1 },
            "list": [{ "API_KEY": "k" }],
            "email": "a@example.com"
        }));

        assert_eq!(redacted["Password"], REDACTED);
        assert_eq!(redacted["nested"]["id_token"], REDACTED);
        assert_eq!(redacted["nested"]["Private Key"], REDACTED);
        assert_eq!(redacted["nested"]["kept"], 1);
        assert_eq!(redacted["list"][0]["API_KEY"], REDACTED);
        assert_eq!(redacted["email"], "a@example.com");
    }

    #[test]
    fn deeply_nested_metadata_is_truncated() {
        let mut value = json!({ "leaf": true });
        for _ in 0..200 {
            value = json!({ "inner": value });
        }

        let mut cursor = &redact(&value);
        let mut depth = 0;
        while let Some(next) = cursor.get("inner") {
            cursor = next;
            depth += 1;
        }
        assert_eq!(cursor, &json!(TRUNCATED));
        assert_eq!(depth, MAX_METADATA_DEPTH);
    }

    #[test]
    fn severity_comes_from_metadata_when_not_set() {
        let entry = AuditEvent::new(AuditAction::UserLogin)
            .meta("severity", "security")
            .into_entry();
        assert_eq!(entry.severity, "SECURITY");

        let entry = AuditEvent::new(AuditAction::UserLogin).into_entry();
        assert_eq!(entry.severity, "INFO");

        let entry = AuditEvent::new(AuditAction::UserLogin)
            .meta("severity", "security")
            .severity(Severity::Warn)
            .into_entry();
        assert_eq!(entry.severity, "WARN");
    }

    #[tokio::test]
    async fn unknown_action_is_not_persisted() {
        let store = Arc::new(InMemoryStore::new());
        let recorder = AuditRecorder::new(store.clone());

        recorder.record_named("USER_TELEPORT", None, None, Some(json!({ "x": 1 })));
        recorder.record_named("user_login", None, None, None);
        recorder.flush().await;

        let entries = store.audit_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "USER_LOGIN");
    }

    #[tokio::test]
    async fn store_failure_is_contained() {
        let store = Arc::new(InMemoryStore::new());
        store.set_fail_audit_writes(true);
        let recorder = AuditRecorder::new(store.clone());

        recorder.record(AuditEvent::new(AuditAction::RateLimitHit).meta("route", "/login"));
        recorder.flush().await;

        assert!(store.audit_entries().is_empty());
    }
}
