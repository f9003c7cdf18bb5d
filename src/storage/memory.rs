//! In-memory backend.
//!
//! Implements every storage collaborator over `parking_lot` guarded maps.
//! Used by the test suite and by the gateway binary when run from a seed
//! fixture. Locks are only held for the duration of a map operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{CacheError, StoreError};

use super::models::{
    BatchStatus, BatchTracking, ComponentAttachment, ComponentType, Device, DeviceRelationship,
    DeviceStatus, OrganizationMembership, Snapshot, TelemetryRow, User,
};
use super::traits::{
    AccountDirectory, BatchStore, ComponentCatalog, DeviceRegistry, ImageIngestor,
    KeyValueCache, TelemetryStore, TelemetryTransaction,
};

#[derive(Debug, Default)]
struct MemoryState {
    devices: HashMap<i64, Device>,
    component_types: HashMap<String, ComponentType>,
    attachments: Vec<ComponentAttachment>,
    users: HashMap<String, User>,
    memberships: Vec<OrganizationMembership>,
    relationships: Vec<DeviceRelationship>,
    snapshots: HashMap<(i64, String), Snapshot>,
    readings: Vec<TelemetryRow>,
    batches: HashMap<String, BatchTracking>,
    images: Vec<(String, Value)>,
}

/// In-memory implementation of the database collaborators.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    next_snapshot_id: Arc<AtomicI64>,
    fail_inserts: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, device: Device) {
        self.state.lock().devices.insert(device.id, device);
    }

    pub fn add_component_type(&self, component: ComponentType) {
        self.state
            .lock()
            .component_types
            .insert(component.name.clone(), component);
    }

    pub fn attach(&self, attachment: ComponentAttachment) {
        self.state.lock().attachments.push(attachment);
    }

    pub fn add_user(&self, user: User) {
        self.state.lock().users.insert(user.username.clone(), user);
    }

    pub fn add_membership(&self, membership: OrganizationMembership) {
        self.state.lock().memberships.push(membership);
    }

    pub fn add_relationship(&self, relationship: DeviceRelationship) {
        self.state.lock().relationships.push(relationship);
    }

    /// Make every subsequent `insert_reading` fail until cleared.
    pub fn inject_insert_failure(&self, enabled: bool) {
        self.fail_inserts.store(enabled, Ordering::SeqCst);
    }

    pub fn device(&self, id: i64) -> Option<Device> {
        self.state.lock().devices.get(&id).cloned()
    }

    pub fn readings(&self) -> Vec<TelemetryRow> {
        self.state.lock().readings.clone()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.state.lock().snapshots.values().cloned().collect()
    }

    pub fn ingested_images(&self) -> usize {
        self.state.lock().images.len()
    }
}

#[async_trait]
impl DeviceRegistry for MemoryBackend {
    async fn find_device(&self, uuid: &str) -> Result<Option<Device>, StoreError> {
        Ok(self
            .state
            .lock()
            .devices
            .values()
            .find(|d| d.uuid == uuid)
            .cloned())
    }

    async fn set_hmac_secret(&self, device_id: i64, secret: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let device = state
            .devices
            .get_mut(&device_id)
            .ok_or_else(|| StoreError::NotFound(format!("device {}", device_id)))?;
        device.hmac_secret = Some(secret.to_string());
        Ok(())
    }

    async fn update_status(&self, device_id: i64, status: DeviceStatus) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let device = state
            .devices
            .get_mut(&device_id)
            .ok_or_else(|| StoreError::NotFound(format!("device {}", device_id)))?;
        device.status = status;
        Ok(())
    }

    async fn devices_with_status(&self, status: DeviceStatus) -> Result<Vec<Device>, StoreError> {
        Ok(self
            .state
            .lock()
            .devices
            .values()
            .filter(|d| d.status == status)
            .cloned()
            .collect())
    }

    async fn is_attached(
        &self,
        device_id: i64,
        component_type_id: i64,
        instance_name: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.state.lock().attachments.iter().any(|a| {
            a.device_id == device_id
                && a.component_type_id == component_type_id
                && a.instance_name == instance_name
        }))
    }
}

#[async_trait]
impl ComponentCatalog for MemoryBackend {
    async fn find_component_type(&self, name: &str) -> Result<Option<ComponentType>, StoreError> {
        Ok(self.state.lock().component_types.get(name).cloned())
    }
}

#[async_trait]
impl AccountDirectory for MemoryBackend {
    async fn find_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().users.get(username).cloned())
    }

    async fn memberships(&self, user_id: i64) -> Result<Vec<OrganizationMembership>, StoreError> {
        Ok(self
            .state
            .lock()
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn device_relationships(
        &self,
        device_id: i64,
    ) -> Result<Vec<DeviceRelationship>, StoreError> {
        Ok(self
            .state
            .lock()
            .relationships
            .iter()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TelemetryStore for MemoryBackend {
    async fn begin(&self) -> Result<Box<dyn TelemetryTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            next_snapshot_id: Arc::clone(&self.next_snapshot_id),
            fail_inserts: Arc::clone(&self.fail_inserts),
            new_snapshot: None,
            rows: Vec::new(),
            touch: None,
        }))
    }
}

/// Buffers writes and applies them under a single lock on commit.
struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    next_snapshot_id: Arc<AtomicI64>,
    fail_inserts: Arc<AtomicBool>,
    new_snapshot: Option<Snapshot>,
    rows: Vec<TelemetryRow>,
    touch: Option<(i64, DateTime<Utc>)>,
}

#[async_trait]
impl TelemetryTransaction for MemoryTransaction {
    async fn get_or_create_snapshot(
        &mut self,
        device_id: i64,
        snapshot_key: &str,
        captured_at: DateTime<Utc>,
    ) -> Result<Snapshot, StoreError> {
        let key = (device_id, snapshot_key.to_string());
        if let Some(existing) = self.state.lock().snapshots.get(&key) {
            return Ok(existing.clone());
        }
        if let Some(pending) = &self.new_snapshot {
            if pending.device_id == device_id && pending.snapshot_key == snapshot_key {
                return Ok(pending.clone());
            }
        }
        let snapshot = Snapshot {
            id: self.next_snapshot_id.fetch_add(1, Ordering::SeqCst) + 1,
            device_id,
            snapshot_key: snapshot_key.to_string(),
            captured_at,
        };
        self.new_snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }

    async fn insert_reading(&mut self, row: TelemetryRow) -> Result<(), StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("insert rejected".to_string()));
        }
        self.rows.push(row);
        Ok(())
    }

    async fn touch_device(
        &mut self,
        device_id: i64,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.touch = Some((device_id, seen_at));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            state,
            new_snapshot,
            mut rows,
            touch,
            ..
        } = *self;
        let mut state = state.lock();

        if let Some((device_id, _)) = touch {
            if !state.devices.contains_key(&device_id) {
                return Err(StoreError::NotFound(format!("device {}", device_id)));
            }
        }

        if let Some(snapshot) = new_snapshot {
            let key = (snapshot.device_id, snapshot.snapshot_key.clone());
            // A concurrent transaction may have created the same snapshot first.
            let winner_id = state
                .snapshots
                .entry(key)
                .or_insert_with(|| snapshot.clone())
                .id;
            if winner_id != snapshot.id {
                for row in rows.iter_mut().filter(|r| r.snapshot_id == snapshot.id) {
                    row.snapshot_id = winner_id;
                }
            }
        }

        state.readings.extend(rows);

        if let Some((device_id, seen_at)) = touch {
            if let Some(device) = state.devices.get_mut(&device_id) {
                device.last_seen_at = Some(seen_at);
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl BatchStore for MemoryBackend {
    async fn insert_batch(&self, batch: BatchTracking) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.batches.contains_key(&batch.batch_id) {
            return Err(StoreError::Constraint(format!(
                "duplicate batch {}",
                batch.batch_id
            )));
        }
        state.batches.insert(batch.batch_id.clone(), batch);
        Ok(())
    }

    async fn increment_processed(&self, batch_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let batch = state
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {}", batch_id)))?;
        batch.processed_count += 1;
        Ok(())
    }

    async fn get_batch(&self, batch_id: &str) -> Result<Option<BatchTracking>, StoreError> {
        Ok(self.state.lock().batches.get(batch_id).cloned())
    }

    async fn mark_completed(&self, batch_id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let batch = state
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {}", batch_id)))?;
        if batch.status.is_terminal() || batch.processed_count < batch.total_count {
            return Ok(false);
        }
        batch.status = BatchStatus::Completed;
        batch.completed_at = Some(at);
        Ok(true)
    }

    async fn mark_failed(&self, batch_id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let batch = state
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {}", batch_id)))?;
        if batch.status.is_terminal() {
            return Ok(false);
        }
        batch.status = BatchStatus::Failed;
        batch.completed_at = Some(at);
        Ok(true)
    }
}

#[async_trait]
impl ImageIngestor for MemoryBackend {
    async fn ingest(&self, topic: &str, payload: &Value) -> Result<(), StoreError> {
        self.state
            .lock()
            .images
            .push((topic.to_string(), payload.clone()));
        Ok(())
    }
}

/// In-memory TTL cache standing in for the shared key-value store.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    unavailable: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the cache being unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some((_, expires_at)) => *expires_at <= Instant::now(),
            None => return Ok(None),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }
}
