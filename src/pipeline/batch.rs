//! Bulk-ingestion progress ledger.
//!
//! Workers report completions concurrently. The processed counter is only
//! ever advanced by the store's atomic increment; the completion
//! transition is a conditional update so concurrent final increments
//! produce exactly one `BATCH_COMPLETED`.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditEventType, AuditTrail, Severity};
use crate::error::{LedgerError, StoreError};
use crate::logging::structured::LogContext;
use crate::storage::models::{BatchStatus, BatchTracking};
use crate::storage::traits::BatchStore;

/// Snapshot of a batch's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchProgress {
    pub batch_id: String,
    pub processed: u64,
    pub total: u64,
    pub percent: f64,
    pub status: BatchStatus,
}

impl From<&BatchTracking> for BatchProgress {
    fn from(batch: &BatchTracking) -> Self {
        let percent = if batch.total_count == 0 {
            0.0
        } else {
            (batch.processed_count as f64 / batch.total_count as f64 * 100.0).min(100.0)
        };
        Self {
            batch_id: batch.batch_id.clone(),
            processed: batch.processed_count,
            total: batch.total_count,
            percent: (percent * 100.0).round() / 100.0,
            status: batch.status,
        }
    }
}

pub struct BatchLedger {
    store: Arc<dyn BatchStore>,
    audit: AuditTrail,
}

impl BatchLedger {
    pub fn new(store: Arc<dyn BatchStore>, audit: AuditTrail) -> Self {
        Self { store, audit }
    }

    /// Register a new bulk-ingestion job and return its id.
    pub async fn open(&self, device_id: &str, total_count: u64, ctx: &LogContext) -> Result<String, LedgerError> {
        if device_id.trim().is_empty() {
            return Err(LedgerError::Invalid("device_id is required".to_string()));
        }
        if total_count == 0 {
            return Err(LedgerError::Invalid("total_count must be positive".to_string()));
        }

        let batch_id = format!("batch-{}", Uuid::new_v4().simple());
        self.store
            .insert_batch(BatchTracking {
                batch_id: batch_id.clone(),
                device_id: device_id.to_string(),
                total_count,
                processed_count: 0,
                status: BatchStatus::Processing,
                created_at: Utc::now(),
                completed_at: None,
            })
            .await?;

        log::info!(
            "{} BATCH_OPENED batch={} device={} total={}",
            ctx,
            batch_id,
            device_id,
            total_count
        );
        Ok(batch_id)
    }

    /// Count one processed item; completes the batch on the last one.
    pub async fn mark_processed(&self, batch_id: &str, ctx: &LogContext) -> Result<BatchProgress, LedgerError> {
        self.store
            .increment_processed(batch_id)
            .await
            .map_err(|e| not_found_or(batch_id, e))?;

        let batch = self.fetch(batch_id).await?;
        if batch.processed_count < batch.total_count || batch.status.is_terminal() {
            return Ok(BatchProgress::from(&batch));
        }

        // Concurrent final increments may all get here; only the caller
        // whose conditional update changed the row reports completion.
        let transitioned = self.store.mark_completed(batch_id, Utc::now()).await?;
        if transitioned {
            log::info!(
                "{} BATCH_COMPLETED batch={} processed={} total={}",
                ctx,
                batch_id,
                batch.processed_count,
                batch.total_count
            );
            self.audit.emit(
                AuditEvent::new(AuditEventType::BatchCompleted, "Bulk ingestion batch completed")
                    .actor(Some(&batch.device_id))
                    .detail("batch_id", batch_id)
                    .detail("total_count", batch.total_count),
            );
        }

        let batch = self.fetch(batch_id).await?;
        Ok(BatchProgress::from(&batch))
    }

    pub async fn progress(&self, batch_id: &str) -> Result<BatchProgress, LedgerError> {
        let batch = self.fetch(batch_id).await?;
        Ok(BatchProgress::from(&batch))
    }

    /// Whether the device may delete its source data for this batch.
    ///
    /// Requires status COMPLETED and the count to agree.
    pub async fn can_purge(&self, batch_id: &str, ctx: &LogContext) -> Result<bool, LedgerError> {
        let batch = self.fetch(batch_id).await?;
        let allowed =
            batch.status == BatchStatus::Completed && batch.processed_count >= batch.total_count;

        let event = if allowed {
            log::info!("{} PURGE_GRANTED batch={}", ctx, batch_id);
            AuditEvent::new(AuditEventType::PurgePermissionGranted, "Source data purge permitted")
        } else {
            log::warn!(
                "{} PURGE_DENIED batch={} status={} processed={} total={}",
                ctx,
                batch_id,
                batch.status.as_str(),
                batch.processed_count,
                batch.total_count
            );
            AuditEvent::new(AuditEventType::PurgePermissionDenied, "Source data purge refused")
                .severity(Severity::Warning)
        };
        self.audit.emit(
            event
                .actor(Some(&batch.device_id))
                .detail("batch_id", batch_id)
                .detail("status", batch.status.as_str())
                .detail("processed_count", batch.processed_count)
                .detail("total_count", batch.total_count),
        );
        Ok(allowed)
    }

    /// Mark a batch FAILED. A terminal batch is left unchanged.
    pub async fn fail(&self, batch_id: &str, reason: &str, ctx: &LogContext) -> Result<bool, LedgerError> {
        let batch = self.fetch(batch_id).await?;
        let transitioned = self.store.mark_failed(batch_id, Utc::now()).await?;
        if transitioned {
            log::warn!("{} BATCH_FAILED batch={} reason={:?}", ctx, batch_id, reason);
            self.audit.emit(
                AuditEvent::new(AuditEventType::BatchFailed, "Bulk ingestion batch failed")
                    .actor(Some(&batch.device_id))
                    .severity(Severity::Warning)
                    .detail("batch_id", batch_id)
                    .detail("reason", reason)
                    .detail("processed_count", batch.processed_count),
            );
        } else {
            log::info!(
                "{} BATCH_FAIL_IGNORED batch={} status={}",
                ctx,
                batch_id,
                batch.status.as_str()
            );
        }
        Ok(transitioned)
    }

    async fn fetch(&self, batch_id: &str) -> Result<BatchTracking, LedgerError> {
        self.store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(batch_id.to_string()))
    }
}

fn not_found_or(batch_id: &str, error: StoreError) -> LedgerError {
    match error {
        StoreError::NotFound(_) => LedgerError::NotFound(batch_id.to_string()),
        other => LedgerError::Store(other),
    }
}
