//! Database models for the trust and admission core.
//!
//! These mirror the rows owned by the device-management collaborator plus
//! the telemetry and batch-tracking tables written by this crate.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Pending,
    Provisioned,
    Online,
    Offline,
    Timeout,
    RecoveryNeeded,
    SafetyLocked,
    Blocked,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Pending => "PENDING",
            DeviceStatus::Provisioned => "PROVISIONED",
            DeviceStatus::Online => "ONLINE",
            DeviceStatus::Offline => "OFFLINE",
            DeviceStatus::Timeout => "TIMEOUT",
            DeviceStatus::RecoveryNeeded => "RECOVERY_NEEDED",
            DeviceStatus::SafetyLocked => "SAFETY_LOCKED",
            DeviceStatus::Blocked => "BLOCKED",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device identity record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    /// Primary external identifier; also the MQTT client id.
    pub uuid: String,
    pub cpu_serial: Option<String>,
    /// Per-device HMAC key, null until enrolled.
    pub hmac_secret: Option<String>,
    pub status: DeviceStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Entry in the supported-component catalog (sensor/actuator model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentType {
    pub id: i64,
    pub name: String,
}

/// A physical component wired to a device slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentAttachment {
    pub device_id: i64,
    pub component_type_id: i64,
    pub instance_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationMembership {
    pub organization_id: i64,
    pub user_id: i64,
    pub active: bool,
}

/// Role a user or organization holds over a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnershipRole {
    Owner,
    Operator,
    Viewer,
}

/// Ownership link between a device and either an organization or a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRelationship {
    pub device_id: i64,
    pub organization_id: Option<i64>,
    pub user_id: Option<i64>,
    pub role: OwnershipRole,
    pub active: bool,
}

/// Observation snapshot grouping the readings of one capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: i64,
    pub device_id: i64,
    /// Client-supplied snapshot identifier, unique per device.
    pub snapshot_key: String,
    pub captured_at: DateTime<Utc>,
}

/// One persisted metric reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRow {
    pub snapshot_id: i64,
    pub device_id: i64,
    pub instance_name: String,
    pub metric: String,
    pub unit: Option<String>,
    pub value: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
    pub slope: f64,
    pub sample_count: i64,
}

/// Bulk-ingestion job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::Processing => "PROCESSING",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

/// Progress row for a bulk-ingestion job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTracking {
    pub batch_id: String,
    pub device_id: String,
    pub total_count: u64,
    pub processed_count: u64,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
