//! Audit event model and sinks.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::AuditError;

/// Actor recorded when a decision has no authenticated caller.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    AuthSuccess,
    AuthFailed,
    DeviceAuthSuccess,
    DeviceAuthFailed,
    AclDenied,
    TelemetryRejected,
    IntegrityViolation,
    DataGapDetected,
    CertificateReused,
    CertificateAcquiredNew,
    BatchCompleted,
    BatchFailed,
    PurgePermissionGranted,
    PurgePermissionDenied,
    DeviceSecretEnrolled,
    DeviceTimeout,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::AuthSuccess => "AUTH_SUCCESS",
            AuditEventType::AuthFailed => "AUTH_FAILED",
            AuditEventType::DeviceAuthSuccess => "DEVICE_AUTH_SUCCESS",
            AuditEventType::DeviceAuthFailed => "DEVICE_AUTH_FAILED",
            AuditEventType::AclDenied => "ACL_DENIED",
            AuditEventType::TelemetryRejected => "TELEMETRY_REJECTED",
            AuditEventType::IntegrityViolation => "INTEGRITY_VIOLATION",
            AuditEventType::DataGapDetected => "DATA_GAP_DETECTED",
            AuditEventType::CertificateReused => "CERTIFICATE_REUSED",
            AuditEventType::CertificateAcquiredNew => "CERTIFICATE_ACQUIRED_NEW",
            AuditEventType::BatchCompleted => "BATCH_COMPLETED",
            AuditEventType::BatchFailed => "BATCH_FAILED",
            AuditEventType::PurgePermissionGranted => "PURGE_PERMISSION_GRANTED",
            AuditEventType::PurgePermissionDenied => "PURGE_PERMISSION_DENIED",
            AuditEventType::DeviceSecretEnrolled => "DEVICE_SECRET_ENROLLED",
            AuditEventType::DeviceTimeout => "DEVICE_TIMEOUT",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One write-only audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub severity: Severity,
    pub description: String,
    pub actor: String,
    pub details: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, description: impl Into<String>) -> Self {
        Self {
            event_type,
            severity: Severity::Info,
            description: description.into(),
            actor: SYSTEM_ACTOR.to_string(),
            details: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Set the actor; empty or absent falls back to [`SYSTEM_ACTOR`].
    pub fn actor(mut self, actor: Option<&str>) -> Self {
        self.actor = match actor {
            Some(a) if !a.is_empty() => a.to_string(),
            _ => SYSTEM_ACTOR.to_string(),
        };
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

/// Write-only audit persistence collaborator.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Sink that writes audit events to the process log.
#[derive(Debug, Default)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let details = serde_json::to_string(&event.details)
            .map_err(|e| AuditError::Rejected(e.to_string()))?;
        match event.severity {
            Severity::Critical => log::error!(
                "AUDIT_EVENT type={} severity=critical actor={} description={:?} details={}",
                event.event_type,
                event.actor,
                event.description,
                details
            ),
            Severity::Warning => log::warn!(
                "AUDIT_EVENT type={} severity=warning actor={} description={:?} details={}",
                event.event_type,
                event.actor,
                event.description,
                details
            ),
            Severity::Info => log::info!(
                "AUDIT_EVENT type={} actor={} description={:?} details={}",
                event.event_type,
                event.actor,
                event.description,
                details
            ),
        }
        Ok(())
    }
}

/// Sink that keeps events in memory; failure can be toggled.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    failing: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn of_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("sink offline".to_string()));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_actor_becomes_system() {
        let event = AuditEvent::new(AuditEventType::AuthFailed, "x").actor(None);
        assert_eq!(event.actor, SYSTEM_ACTOR);

        let event = AuditEvent::new(AuditEventType::AuthFailed, "x").actor(Some(""));
        assert_eq!(event.actor, SYSTEM_ACTOR);

        let event = AuditEvent::new(AuditEventType::AuthFailed, "x").actor(Some("alice"));
        assert_eq!(event.actor, "alice");
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(AuditEventType::DataGapDetected.as_str(), "DATA_GAP_DETECTED");
        assert_eq!(
            serde_json::to_string(&AuditEventType::CertificateAcquiredNew).unwrap(),
            "\"CERTIFICATE_ACQUIRED_NEW\""
        );
    }
}
