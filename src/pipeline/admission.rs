//! Telemetry admission pipeline.
//!
//! Coordinates the per-message workflow, short-circuiting on the first
//! failure:
//! 1. Topic sanity (telemetry channel, device segment)
//! 2. Device lookup, status must be ONLINE
//! 3. Component-type catalog lookup
//! 4. CPU serial, then HMAC signature
//! 5. Component attachment
//! 6. Snapshot get-or-create
//! 7. Sequence reconciliation (non-fatal)
//! 8. One row per metric reading
//! 9. Device `last_seen_at`
//! 10. Commit 6-9 as one transaction
//!
//! Every rejection records exactly one audit event.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::audit::{AuditEvent, AuditEventType, AuditTrail, Severity};
use crate::error::{AdmissionError, StoreError};
use crate::logging::structured::LogContext;
use crate::routing::topic::{device_id_from_topic, is_telemetry_topic};
use crate::storage::models::{ComponentType, Device, DeviceStatus, TelemetryRow};
use crate::storage::traits::{
    ComponentCatalog, DeviceRegistry, TelemetryStore, TelemetryTransaction,
};
use crate::validation::integrity::{IntegrityCheck, IntegrityValidator};

use super::context::MessageContext;
use super::payload::TelemetryPayload;
use super::sequence::{SequenceCache, SequenceGap};

/// Checkpoints of the admission state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionStage {
    Received,
    DeviceChecked,
    ComponentChecked,
    IntegrityChecked,
    AttachmentChecked,
    SequenceReconciled,
    Committed,
}

impl AdmissionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionStage::Received => "RECEIVED",
            AdmissionStage::DeviceChecked => "DEVICE_CHECKED",
            AdmissionStage::ComponentChecked => "COMPONENT_CHECKED",
            AdmissionStage::IntegrityChecked => "INTEGRITY_CHECKED",
            AdmissionStage::AttachmentChecked => "ATTACHMENT_CHECKED",
            AdmissionStage::SequenceReconciled => "SEQUENCE_RECONCILED",
            AdmissionStage::Committed => "COMMITTED",
        }
    }
}

impl fmt::Display for AdmissionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed telemetry message.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionReceipt {
    pub snapshot_id: i64,
    pub rows_written: usize,
    pub gap: Option<SequenceGap>,
}

/// A rejected telemetry message: the last checkpoint passed and why it
/// went no further.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionRejection {
    pub stage: AdmissionStage,
    pub error: AdmissionError,
}

impl AdmissionRejection {
    fn at(stage: AdmissionStage, error: AdmissionError) -> Self {
        Self { stage, error }
    }

    pub fn reason(&self) -> String {
        self.error.to_string()
    }
}

pub type AdmissionResult = Result<AdmissionReceipt, AdmissionRejection>;

/// Device-existence validation for telemetry: the device must be ONLINE.
pub fn validate_device_online(device: &Device) -> Result<(), AdmissionError> {
    if device.status == DeviceStatus::Online {
        Ok(())
    } else {
        Err(AdmissionError::DeviceState(device.status.to_string()))
    }
}

pub struct TelemetryAdmission {
    devices: Arc<dyn DeviceRegistry>,
    catalog: Arc<dyn ComponentCatalog>,
    store: Arc<dyn TelemetryStore>,
    integrity: IntegrityValidator,
    sequences: SequenceCache,
    audit: AuditTrail,
    topic_namespace: Option<String>,
}

impl TelemetryAdmission {
    pub fn new(
        devices: Arc<dyn DeviceRegistry>,
        catalog: Arc<dyn ComponentCatalog>,
        store: Arc<dyn TelemetryStore>,
        sequences: SequenceCache,
        audit: AuditTrail,
    ) -> Self {
        let integrity = IntegrityValidator::new(Arc::clone(&devices), audit.clone());
        Self {
            devices,
            catalog,
            store,
            integrity,
            sequences,
            audit,
            topic_namespace: None,
        }
    }

    /// Only accept topics under `namespace` (first path segment).
    pub fn with_topic_namespace(mut self, namespace: &str) -> Self {
        self.topic_namespace = Some(namespace.to_string());
        self
    }

    pub fn integrity(&self) -> &IntegrityValidator {
        &self.integrity
    }

    /// Run one message through the pipeline.
    ///
    /// Either every row of the message is committed or nothing is.
    pub async fn admit(&self, msg: &MessageContext, payload: &Value) -> AdmissionResult {
        let ctx = msg.log_context();
        log::debug!(
            "{} TELEMETRY_RECEIVED topic={} transport={}",
            ctx,
            msg.topic,
            msg.transport.as_str()
        );

        let result = self.run(msg, payload, &ctx).await;
        match &result {
            Ok(receipt) => {
                log::info!(
                    "{} TELEMETRY_COMMITTED snapshot_id={} rows={} gap={}",
                    ctx,
                    receipt.snapshot_id,
                    receipt.rows_written,
                    receipt.gap.is_some()
                );
            }
            Err(rejection) => self.record_rejection(msg, rejection, &ctx),
        }
        result
    }

    async fn run(&self, msg: &MessageContext, payload: &Value, ctx: &LogContext) -> AdmissionResult {
        use AdmissionStage::*;

        // [1] TOPIC SANITY
        if !is_telemetry_topic(&msg.topic) {
            return Err(AdmissionRejection::at(
                Received,
                AdmissionError::Malformed("topic is not a telemetry channel".to_string()),
            ));
        }
        if let Some(namespace) = &self.topic_namespace {
            if msg.topic.split('/').next() != Some(namespace.as_str()) {
                return Err(AdmissionRejection::at(
                    Received,
                    AdmissionError::Malformed(format!("topic outside namespace {}", namespace)),
                ));
            }
        }
        let Some(device_uuid) = device_id_from_topic(&msg.topic) else {
            return Err(AdmissionRejection::at(
                Received,
                AdmissionError::Malformed("topic has no device segment".to_string()),
            ));
        };
        let telemetry = TelemetryPayload::from_value(payload)
            .map_err(|reason| AdmissionRejection::at(Received, AdmissionError::Malformed(reason)))?;

        // [2] DEVICE
        let device = match self.devices.find_device(device_uuid).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                return Err(AdmissionRejection::at(
                    Received,
                    AdmissionError::NotFound("device not registered".to_string()),
                ))
            }
            Err(e) => {
                log::error!("{} DEVICE_LOOKUP_FAILED error={}", ctx, e);
                return Err(AdmissionRejection::at(
                    Received,
                    AdmissionError::Infrastructure("device lookup".to_string()),
                ));
            }
        };
        validate_device_online(&device).map_err(|e| AdmissionRejection::at(Received, e))?;

        // [3] COMPONENT TYPE
        let component = self
            .lookup_component(&telemetry.component_type, ctx)
            .await
            .map_err(|e| AdmissionRejection::at(DeviceChecked, e))?;

        // [4] INTEGRITY: serial first, it is the cheap filter
        let serial = self.integrity.validate_cpu_serial(&device, payload, ctx);
        integrity_result(serial).map_err(|e| AdmissionRejection::at(ComponentChecked, e))?;
        let hmac = self.integrity.validate_hmac(&device, payload, ctx);
        integrity_result(hmac).map_err(|e| AdmissionRejection::at(ComponentChecked, e))?;

        // [5] ATTACHMENT
        match self
            .devices
            .is_attached(device.id, component.id, &telemetry.instance_name)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return Err(AdmissionRejection::at(
                    IntegrityChecked,
                    AdmissionError::NotFound(format!(
                        "component {} instance {} not attached to device",
                        component.name, telemetry.instance_name
                    )),
                ))
            }
            Err(e) => {
                log::error!("{} ATTACHMENT_LOOKUP_FAILED error={}", ctx, e);
                return Err(AdmissionRejection::at(
                    IntegrityChecked,
                    AdmissionError::Infrastructure("attachment lookup".to_string()),
                ));
            }
        }

        // [6-9] ONE TRANSACTION, [10] COMMIT, then sequence reconciliation
        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                log::error!("{} TELEMETRY_TX_BEGIN_FAILED error={}", ctx, e);
                return Err(AdmissionRejection::at(AttachmentChecked, AdmissionError::Persistence));
            }
        };

        let seen_at = telemetry.captured_at.unwrap_or_else(Utc::now);
        match self
            .write_telemetry(tx.as_mut(), &device, &telemetry, seen_at)
            .await
        {
            Ok((snapshot_id, rows_written)) => match tx.commit().await {
                Ok(()) => {
                    // The cache and gap events only ever reflect committed messages.
                    let gap = match telemetry.sequence_number {
                        Some(full) => {
                            self.sequences
                                .reconcile(&device, &telemetry.instance_name, full, ctx)
                                .await
                        }
                        None => {
                            log::debug!("{} SEQUENCE_SKIP reason=no_sequence_number", ctx);
                            None
                        }
                    };
                    Ok(AdmissionReceipt {
                        snapshot_id,
                        rows_written,
                        gap,
                    })
                }
                Err(e) => {
                    log::error!("{} TELEMETRY_COMMIT_FAILED error={}", ctx, e);
                    Err(AdmissionRejection::at(AttachmentChecked, AdmissionError::Persistence))
                }
            },
            Err(e) => {
                log::error!("{} TELEMETRY_WRITE_FAILED error={}", ctx, e);
                if let Err(rollback) = tx.rollback().await {
                    log::error!("{} TELEMETRY_ROLLBACK_FAILED error={}", ctx, rollback);
                }
                Err(AdmissionRejection::at(AttachmentChecked, AdmissionError::Persistence))
            }
        }
    }

    async fn lookup_component(
        &self,
        name: &str,
        ctx: &LogContext,
    ) -> Result<ComponentType, AdmissionError> {
        match self.catalog.find_component_type(name).await {
            Ok(Some(component)) => Ok(component),
            Ok(None) => Err(AdmissionError::NotFound(format!(
                "unsupported component type: {}",
                name
            ))),
            Err(e) => {
                log::error!("{} COMPONENT_LOOKUP_FAILED component={} error={}", ctx, name, e);
                Err(AdmissionError::Infrastructure("component lookup".to_string()))
            }
        }
    }

    /// Snapshot, readings and `last_seen_at` inside `tx`. Sequence
    /// reconciliation runs only once the transaction has committed.
    async fn write_telemetry(
        &self,
        tx: &mut dyn TelemetryTransaction,
        device: &Device,
        telemetry: &TelemetryPayload,
        seen_at: DateTime<Utc>,
    ) -> Result<(i64, usize), StoreError> {
        let snapshot = tx
            .get_or_create_snapshot(device.id, &telemetry.snapshot_id, seen_at)
            .await?;

        for reading in &telemetry.readings {
            let row = TelemetryRow {
                snapshot_id: snapshot.id,
                device_id: device.id,
                instance_name: telemetry.instance_name.clone(),
                metric: reading.metric.clone(),
                unit: reading.unit.clone(),
                value: reading.value,
                avg: reading.avg,
                min: reading.min,
                max: reading.max,
                stddev: reading.stddev,
                slope: reading.slope,
                sample_count: reading.sample_count,
            };
            tx.insert_reading(row)
                .await?;
        }

        tx.touch_device(device.id, seen_at)
            .await?;

        Ok((snapshot.id, telemetry.readings.len()))
    }

    fn record_rejection(&self, msg: &MessageContext, rejection: &AdmissionRejection, ctx: &LogContext) {
        let actor = device_id_from_topic(&msg.topic);
        let reason = rejection.reason();

        let event = match &rejection.error {
            AdmissionError::Integrity { critical, .. } => {
                let severity = if *critical {
                    Severity::Critical
                } else {
                    Severity::Warning
                };
                AuditEvent::new(AuditEventType::IntegrityViolation, "Telemetry integrity check failed")
                    .severity(severity)
            }
            _ => AuditEvent::new(AuditEventType::TelemetryRejected, "Telemetry rejected")
                .severity(Severity::Warning),
        };

        log::warn!(
            "{} TELEMETRY_REJECTED stage={} reason={:?}",
            ctx,
            rejection.stage,
            reason
        );
        self.audit.emit(
            event
                .actor(actor)
                .detail("topic", &msg.topic)
                .detail("transport", msg.transport.as_str())
                .detail("stage", rejection.stage)
                .detail("reason", reason),
        );
    }
}

fn integrity_result(check: IntegrityCheck) -> Result<(), AdmissionError> {
    if check.valid {
        return Ok(());
    }
    Err(AdmissionError::Integrity {
        reason: check.reason.unwrap_or_else(|| "integrity check failed".to_string()),
        critical: check.critical,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::pipeline::context::Transport;
    use crate::pipeline::sequence::DEFAULT_SEQUENCE_TTL;
    use crate::storage::memory::{MemoryBackend, MemoryCache};
    use crate::storage::models::ComponentAttachment;
    use crate::validation::integrity::sign_payload;
    use serde_json::json;

    const SECRET: &str = "S3cr3t-device-key";
    const TOPIC: &str = "ares4/D1/telemetry";

    struct Harness {
        admission: TelemetryAdmission,
        backend: Arc<MemoryBackend>,
        sink: Arc<MemoryAuditSink>,
        trail: AuditTrail,
    }

    fn harness(status: DeviceStatus) -> Harness {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_device(Device {
            id: 1,
            uuid: "D1".to_string(),
            cpu_serial: Some("10000000abcdef01".to_string()),
            hmac_secret: Some(SECRET.to_string()),
            status,
            last_seen_at: None,
        });
        backend.add_component_type(ComponentType {
            id: 3,
            name: "DHT22".to_string(),
        });
        backend.attach(ComponentAttachment {
            device_id: 1,
            component_type_id: 3,
            instance_name: "greenhouse-left".to_string(),
        });
        let sink = Arc::new(MemoryAuditSink::new());
        let trail = AuditTrail::spawn(sink.clone());
        let sequences = SequenceCache::new(
            Arc::new(MemoryCache::new()),
            DEFAULT_SEQUENCE_TTL,
            trail.clone(),
        );
        let admission = TelemetryAdmission::new(
            backend.clone(),
            backend.clone(),
            backend.clone(),
            sequences,
            trail.clone(),
        );
        Harness {
            admission,
            backend,
            sink,
            trail,
        }
    }

    fn signed(mut payload: Value) -> Value {
        payload["signature"] = json!(sign_payload(SECRET, &payload).unwrap());
        payload
    }

    fn payload() -> Value {
        json!({
            "cpu_serial": "10000000abcdef01",
            "component_type": "DHT22",
            "instance_name": "greenhouse-left",
            "snapshot_id": "snap-0001",
            "captured_at": "2026-01-01T10:00:00Z",
            "sequence_number": 2026010100010u64,
            "data": [{"metric": "temperature", "value": 21.5, "unit": "°C"}]
        })
    }

    fn msg(topic: &str) -> MessageContext {
        MessageContext::new(topic, Transport::Mqtt)
    }

    #[tokio::test]
    async fn test_signed_message_commits() {
        let h = harness(DeviceStatus::Online);
        let receipt = h.admission.admit(&msg(TOPIC), &signed(payload())).await.unwrap();
        h.trail.flush().await;

        assert_eq!(receipt.rows_written, 1);
        assert!(receipt.gap.is_none());
        assert_eq!(h.backend.readings().len(), 1);
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_non_online_status_named_in_reason() {
        let h = harness(DeviceStatus::SafetyLocked);
        let rejection = h
            .admission
            .admit(&msg(TOPIC), &signed(payload()))
            .await
            .unwrap_err();
        h.trail.flush().await;

        assert!(rejection.reason().contains("SAFETY_LOCKED"));
        assert_eq!(rejection.stage, AdmissionStage::Received);
        assert_eq!(h.sink.of_type(AuditEventType::TelemetryRejected).len(), 1);
    }

    #[tokio::test]
    async fn test_non_telemetry_topic_rejected() {
        let h = harness(DeviceStatus::Online);
        let rejection = h
            .admission
            .admit(&msg("ares4/D1/state"), &signed(payload()))
            .await
            .unwrap_err();

        assert!(matches!(rejection.error, AdmissionError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_topic_namespace_enforced() {
        let h = harness(DeviceStatus::Online);
        let admission = h.admission.with_topic_namespace("ares4");

        assert!(admission.admit(&msg(TOPIC), &signed(payload())).await.is_ok());
        let rejection = admission
            .admit(&msg("legacy/D1/telemetry"), &signed(payload()))
            .await
            .unwrap_err();
        assert!(rejection.reason().contains("namespace"));
    }

    #[tokio::test]
    async fn test_unknown_component_and_unattached_instance() {
        let h = harness(DeviceStatus::Online);

        let mut unknown = payload();
        unknown["component_type"] = json!("BME680");
        let rejection = h.admission.admit(&msg(TOPIC), &signed(unknown)).await.unwrap_err();
        assert_eq!(rejection.stage, AdmissionStage::DeviceChecked);

        let mut unattached = payload();
        unattached["instance_name"] = json!("greenhouse-right");
        let rejection = h
            .admission
            .admit(&msg(TOPIC), &signed(unattached))
            .await
            .unwrap_err();
        assert_eq!(rejection.stage, AdmissionStage::IntegrityChecked);
        assert!(h.backend.readings().is_empty());
    }

    #[tokio::test]
    async fn test_bad_signature_is_integrity_violation() {
        let h = harness(DeviceStatus::Online);
        let mut tampered = signed(payload());
        tampered["data"][0]["value"] = json!(30.0);

        let rejection = h.admission.admit(&msg(TOPIC), &tampered).await.unwrap_err();
        h.trail.flush().await;

        assert!(matches!(
            rejection.error,
            AdmissionError::Integrity { critical: false, .. }
        ));
        let events = h.sink.of_type(AuditEventType::IntegrityViolation);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_missing_sequence_skips_reconciliation() {
        let h = harness(DeviceStatus::Online);
        let mut unsequenced = payload();
        unsequenced.as_object_mut().unwrap().remove("sequence_number");

        let receipt = h
            .admission
            .admit(&msg(TOPIC), &signed(unsequenced))
            .await
            .unwrap();
        assert!(receipt.gap.is_none());
    }
}
