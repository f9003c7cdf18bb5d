//! Sequence gap reconciliation.
//!
//! Devices stamp each message with `full = date * 100000 + counter`.
//! The last accepted value per (device, instance) lives in the shared
//! cache; a jump of more than one within the same date bucket is a gap.
//! The cache is not authoritative: a miss only means no history.

use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditEvent, AuditEventType, AuditTrail, Severity};
use crate::error::CacheError;
use crate::logging::structured::LogContext;
use crate::storage::models::Device;
use crate::storage::traits::KeyValueCache;

/// Counter range per date bucket.
pub const SEQUENCE_BUCKET: u64 = 100_000;

/// Default entry lifetime: seven days.
pub const DEFAULT_SEQUENCE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Split a full sequence number into `(date_bucket, counter)`.
pub fn split_sequence(full: u64) -> (u64, u64) {
    (full / SEQUENCE_BUCKET, full % SEQUENCE_BUCKET)
}

/// Counters missed between two messages of the same bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceGap {
    pub date_bucket: u64,
    pub first_missing: u64,
    pub last_missing: u64,
}

impl SequenceGap {
    pub fn missed(&self) -> u64 {
        self.last_missing - self.first_missing + 1
    }
}

/// Gap between the last seen and the current sequence, if any.
pub fn detect_gap(last_full: u64, current_full: u64) -> Option<SequenceGap> {
    let (last_date, last_counter) = split_sequence(last_full);
    let (date, counter) = split_sequence(current_full);
    if date == last_date && counter > last_counter + 1 {
        Some(SequenceGap {
            date_bucket: date,
            first_missing: last_counter + 1,
            last_missing: counter - 1,
        })
    } else {
        None
    }
}

pub struct SequenceCache {
    cache: Arc<dyn KeyValueCache>,
    ttl: Duration,
    audit: AuditTrail,
}

impl SequenceCache {
    pub fn new(cache: Arc<dyn KeyValueCache>, ttl: Duration, audit: AuditTrail) -> Self {
        Self { cache, ttl, audit }
    }

    pub fn key(device_id: i64, instance_name: &str) -> String {
        format!("seq:{}:{}", device_id, instance_name)
    }

    /// Last accepted full sequence for the instance.
    pub async fn last_seen(&self, device_id: i64, instance_name: &str) -> Result<Option<u64>, CacheError> {
        let key = Self::key(device_id, instance_name);
        match self.cache.get(&key).await? {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| CacheError::Corrupt { key, value: raw }),
            None => Ok(None),
        }
    }

    /// Record `full_sequence` and report any gap since the last message.
    ///
    /// Never fails: cache faults are logged and reconciliation is skipped
    /// or partial. The cached value is always overwritten (last write wins).
    pub async fn reconcile(
        &self,
        device: &Device,
        instance_name: &str,
        full_sequence: u64,
        ctx: &LogContext,
    ) -> Option<SequenceGap> {
        let previous = match self.last_seen(device.id, instance_name).await {
            Ok(previous) => previous,
            Err(CacheError::Corrupt { key, value }) => {
                log::warn!("{} SEQUENCE_CACHE_CORRUPT key={} value={:?}", ctx, key, value);
                None
            }
            Err(e) => {
                log::error!("{} SEQUENCE_CACHE_READ_FAILED error={}", ctx, e);
                None
            }
        };

        let gap = previous.and_then(|last| {
            let (last_date, last_counter) = split_sequence(last);
            let (date, counter) = split_sequence(full_sequence);
            if date == last_date && counter <= last_counter {
                log::info!(
                    "{} SEQUENCE_REGRESSION instance={} last={} current={}",
                    ctx,
                    instance_name,
                    last,
                    full_sequence
                );
            }
            detect_gap(last, full_sequence)
        });

        if let Some(gap) = &gap {
            log::warn!(
                "{} DATA_GAP_DETECTED instance={} bucket={} missing={}..={}",
                ctx,
                instance_name,
                gap.date_bucket,
                gap.first_missing,
                gap.last_missing
            );
            self.audit.emit(
                AuditEvent::new(AuditEventType::DataGapDetected, "Telemetry sequence gap detected")
                    .actor(Some(&device.uuid))
                    .severity(Severity::Warning)
                    .detail("device_id", device.id)
                    .detail("instance_name", instance_name)
                    .detail("date_bucket", gap.date_bucket)
                    .detail("first_missing", gap.first_missing)
                    .detail("last_missing", gap.last_missing)
                    .detail("missed_count", gap.missed()),
            );
        }

        let key = Self::key(device.id, instance_name);
        if let Err(e) = self
            .cache
            .set_with_ttl(&key, &full_sequence.to_string(), self.ttl)
            .await
        {
            log::error!("{} SEQUENCE_CACHE_WRITE_FAILED key={} error={}", ctx, key, e);
        }

        gap
    }
}
