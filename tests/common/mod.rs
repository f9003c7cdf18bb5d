//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use ares_trust_core::audit::{AuditTrail, MemoryAuditSink};
use ares_trust_core::http::AppState;
use ares_trust_core::pipeline::{
    BatchLedger, SequenceCache, TelemetryAdmission, DEFAULT_SEQUENCE_TTL,
};
use ares_trust_core::security::{default_system_rules, AclEngine, BrokerAuthEngine};
use ares_trust_core::storage::{
    ComponentAttachment, ComponentType, Device, DeviceRelationship, DeviceStatus, MemoryBackend,
    MemoryCache, OrganizationMembership, OwnershipRole, User,
};
use ares_trust_core::validation::sign_payload;

pub const SECRET: &str = "S3cr3t-device-key";
pub const CPU_SERIAL: &str = "10000000abcdef01";
pub const TELEMETRY_TOPIC: &str = "ares4/D1/telemetry";

pub struct World {
    pub backend: Arc<MemoryBackend>,
    pub cache: Arc<MemoryCache>,
    pub sink: Arc<MemoryAuditSink>,
    pub trail: AuditTrail,
    pub admission: Arc<TelemetryAdmission>,
    pub ledger: Arc<BatchLedger>,
    pub auth: Arc<BrokerAuthEngine>,
    pub acl: Arc<AclEngine>,
}

impl World {
    pub fn new() -> Self {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_device(Device {
            id: 1,
            uuid: "D1".to_string(),
            cpu_serial: Some(CPU_SERIAL.to_string()),
            hmac_secret: Some(SECRET.to_string()),
            status: DeviceStatus::Online,
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
        backend.add_user(User {
            id: 10,
            username: "grower".to_string(),
        });
        backend.add_user(User {
            id: 11,
            username: "auditor".to_string(),
        });
        backend.add_membership(OrganizationMembership {
            organization_id: 100,
            user_id: 11,
            active: true,
        });
        backend.add_relationship(DeviceRelationship {
            device_id: 1,
            organization_id: None,
            user_id: Some(10),
            role: OwnershipRole::Owner,
            active: true,
        });
        backend.add_relationship(DeviceRelationship {
            device_id: 1,
            organization_id: Some(100),
            user_id: None,
            role: OwnershipRole::Viewer,
            active: true,
        });

        let cache = Arc::new(MemoryCache::new());
        let sink = Arc::new(MemoryAuditSink::new());
        let trail = AuditTrail::spawn(sink.clone());

        let sequences = SequenceCache::new(cache.clone(), DEFAULT_SEQUENCE_TTL, trail.clone());
        let admission = Arc::new(
            TelemetryAdmission::new(
                backend.clone(),
                backend.clone(),
                backend.clone(),
                sequences,
                trail.clone(),
            )
            .with_topic_namespace("ares4"),
        );
        let ledger = Arc::new(BatchLedger::new(backend.clone(), trail.clone()));
        let auth = Arc::new(BrokerAuthEngine::new(
            backend.clone(),
            backend.clone(),
            trail.clone(),
        ));
        let acl = Arc::new(AclEngine::new(
            vec!["admin".to_string()],
            default_system_rules(),
            backend.clone(),
            backend.clone(),
            trail.clone(),
        ));

        Self {
            backend,
            cache,
            sink,
            trail,
            admission,
            ledger,
            auth,
            acl,
        }
    }

    pub fn app_state(&self, publish_secret: Option<&str>) -> AppState {
        AppState {
            auth: self.auth.clone(),
            acl: self.acl.clone(),
            admission: self.admission.clone(),
            ledger: self.ledger.clone(),
            images: self.backend.clone(),
            publish_secret: publish_secret.map(|s| s.to_string()),
        }
    }
}

/// One-reading telemetry payload without a signature.
pub fn telemetry_payload(sequence_number: u64) -> Value {
    json!({
        "cpu_serial": CPU_SERIAL,
        "component_type": "DHT22",
        "instance_name": "greenhouse-left",
        "snapshot_id": "snap-0001",
        "captured_at": "2026-01-01T10:00:00Z",
        "sequence_number": sequence_number,
        "data": [{"metric": "temperature", "value": 21.5, "unit": "°C"}]
    })
}

pub fn sign(mut payload: Value) -> Value {
    let signature = sign_payload(SECRET, &payload).unwrap();
    payload["signature"] = json!(signature);
    payload
}
