//! Collaborator traits at the true external boundaries.
//!
//! Engines hold these as `Arc<dyn Trait>`; every call is potentially
//! blocking I/O and must not be made while holding an in-process lock.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{CacheError, StoreError};

use super::models::{
    BatchTracking, ComponentType, Device, DeviceRelationship, DeviceStatus,
    OrganizationMembership, Snapshot, TelemetryRow, User,
};

/// Device records owned by the device-management collaborator.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn find_device(&self, uuid: &str) -> Result<Option<Device>, StoreError>;

    async fn set_hmac_secret(&self, device_id: i64, secret: &str) -> Result<(), StoreError>;

    async fn update_status(&self, device_id: i64, status: DeviceStatus) -> Result<(), StoreError>;

    async fn devices_with_status(&self, status: DeviceStatus) -> Result<Vec<Device>, StoreError>;

    async fn is_attached(
        &self,
        device_id: i64,
        component_type_id: i64,
        instance_name: &str,
    ) -> Result<bool, StoreError>;
}

/// Supported-component catalog.
#[async_trait]
pub trait ComponentCatalog: Send + Sync {
    async fn find_component_type(&self, name: &str) -> Result<Option<ComponentType>, StoreError>;
}

/// Users, organization memberships and device ownership.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_user(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn memberships(&self, user_id: i64) -> Result<Vec<OrganizationMembership>, StoreError>;

    async fn device_relationships(
        &self,
        device_id: i64,
    ) -> Result<Vec<DeviceRelationship>, StoreError>;
}

/// Entry point for isolated telemetry write transactions.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn TelemetryTransaction>, StoreError>;
}

/// One telemetry write transaction.
///
/// Nothing written through a transaction is visible until `commit`.
/// Dropping a transaction without committing discards it.
#[async_trait]
pub trait TelemetryTransaction: Send {
    async fn get_or_create_snapshot(
        &mut self,
        device_id: i64,
        snapshot_key: &str,
        captured_at: DateTime<Utc>,
    ) -> Result<Snapshot, StoreError>;

    async fn insert_reading(&mut self, row: TelemetryRow) -> Result<(), StoreError>;

    async fn touch_device(&mut self, device_id: i64, seen_at: DateTime<Utc>)
        -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Batch-tracking rows.
///
/// `increment_processed` must be a single atomic storage-level update.
/// `mark_completed` and `mark_failed` are conditional updates returning
/// whether this call actually changed the row.
#[async_trait]
pub trait BatchStore: Send + Sync {
    async fn insert_batch(&self, batch: BatchTracking) -> Result<(), StoreError>;

    async fn increment_processed(&self, batch_id: &str) -> Result<(), StoreError>;

    async fn get_batch(&self, batch_id: &str) -> Result<Option<BatchTracking>, StoreError>;

    async fn mark_completed(&self, batch_id: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn mark_failed(&self, batch_id: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;
}

/// Shared key-value cache with per-entry TTL.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
}

/// Image ingestion collaborator reached through the publish bridge.
#[async_trait]
pub trait ImageIngestor: Send + Sync {
    async fn ingest(&self, topic: &str, payload: &Value) -> Result<(), StoreError>;
}
