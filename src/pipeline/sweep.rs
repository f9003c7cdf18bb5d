//! Device-timeout sweep.
//!
//! ONLINE devices that have not been seen within the timeout are moved to
//! TIMEOUT. One sweep task runs per process.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::audit::{AuditEvent, AuditEventType, AuditTrail, Severity};
use crate::error::StoreError;
use crate::logging::structured::LogContext;
use crate::storage::models::{Device, DeviceStatus};
use crate::storage::traits::DeviceRegistry;

pub struct DeviceTimeoutSweep {
    devices: Arc<dyn DeviceRegistry>,
    audit: AuditTrail,
    timeout: Duration,
    interval: Duration,
}

impl DeviceTimeoutSweep {
    pub fn new(
        devices: Arc<dyn DeviceRegistry>,
        audit: AuditTrail,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            devices,
            audit,
            timeout,
            interval,
        }
    }

    fn is_stale(&self, device: &Device, now: DateTime<Utc>) -> bool {
        match device.last_seen_at {
            None => true,
            Some(seen) => match (now - seen).to_std() {
                Ok(idle) => idle > self.timeout,
                // last_seen_at in the future
                Err(_) => false,
            },
        }
    }

    /// Time out stale ONLINE devices; returns how many were moved.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let ctx = LogContext::new("sweep");
        let online = self.devices.devices_with_status(DeviceStatus::Online).await?;

        let mut timed_out = 0;
        for device in online.iter().filter(|d| self.is_stale(d, now)) {
            let device_ctx = ctx.with_subject(&device.uuid);
            if let Err(e) = self.devices.update_status(device.id, DeviceStatus::Timeout).await {
                log::error!("{} DEVICE_TIMEOUT_UPDATE_FAILED error={}", device_ctx, e);
                continue;
            }
            timed_out += 1;
            log::info!(
                "{} DEVICE_TIMEOUT last_seen_at={:?}",
                device_ctx,
                device.last_seen_at
            );
            self.audit.emit(
                AuditEvent::new(AuditEventType::DeviceTimeout, "Device stopped reporting")
                    .actor(Some(&device.uuid))
                    .severity(Severity::Warning)
                    .detail("device_id", device.id)
                    .detail(
                        "last_seen_at",
                        device
                            .last_seen_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "never".to_string()),
                    ),
            );
        }

        if timed_out > 0 {
            log::info!("{} SWEEP_COMPLETE timed_out={} online={}", ctx, timed_out, online.len());
        }
        Ok(timed_out)
    }

    /// Sweep every interval until `shutdown` is true. Spurious `false`
    /// notifications leave the next deadline where it was.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "SWEEP_STARTED interval_secs={} timeout_secs={}",
            self.interval.as_secs(),
            self.timeout.as_secs()
        );
        let mut deadline = Instant::now() + self.interval;
        while !*shutdown.borrow_and_update() {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    if let Err(e) = self.sweep_once(Utc::now()).await {
                        log::error!("SWEEP_FAILED error={}", e);
                    }
                    deadline = Instant::now() + self.interval;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        log::info!("SWEEP_STOPPED");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::storage::memory::MemoryBackend;

    fn device(id: i64, status: DeviceStatus, last_seen_at: Option<DateTime<Utc>>) -> Device {
        Device {
            id,
            uuid: format!("D{}", id),
            cpu_serial: None,
            hmac_secret: None,
            status,
            last_seen_at,
        }
    }

    #[tokio::test]
    async fn test_sweep_times_out_stale_online_devices() {
        let now = Utc::now();
        let backend = Arc::new(MemoryBackend::new());
        backend.add_device(device(1, DeviceStatus::Online, Some(now - chrono::Duration::minutes(10))));
        backend.add_device(device(2, DeviceStatus::Online, Some(now - chrono::Duration::seconds(30))));
        backend.add_device(device(3, DeviceStatus::Online, None));
        backend.add_device(device(4, DeviceStatus::Offline, None));

        let sink = Arc::new(MemoryAuditSink::new());
        let trail = AuditTrail::spawn(sink.clone());
        let sweep = DeviceTimeoutSweep::new(
            backend.clone(),
            trail.clone(),
            Duration::from_secs(300),
            Duration::from_secs(60),
        );

        assert_eq!(sweep.sweep_once(now).await.unwrap(), 2);
        trail.flush().await;

        assert_eq!(backend.device(1).unwrap().status, DeviceStatus::Timeout);
        assert_eq!(backend.device(2).unwrap().status, DeviceStatus::Online);
        assert_eq!(backend.device(3).unwrap().status, DeviceStatus::Timeout);
        assert_eq!(backend.device(4).unwrap().status, DeviceStatus::Offline);
        assert_eq!(sink.of_type(AuditEventType::DeviceTimeout).len(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let backend = Arc::new(MemoryBackend::new());
        let trail = AuditTrail::spawn(Arc::new(MemoryAuditSink::new()));
        let sweep = DeviceTimeoutSweep::new(
            backend,
            trail,
            Duration::from_secs(300),
            Duration::from_secs(3600),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sweep.run(rx));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_honours_shutdown_set_before_start() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_device(device(1, DeviceStatus::Online, None));
        let trail = AuditTrail::spawn(Arc::new(MemoryAuditSink::new()));
        let sweep = DeviceTimeoutSweep::new(
            backend.clone(),
            trail,
            Duration::from_secs(300),
            Duration::from_secs(60),
        );
        let (_tx, rx) = watch::channel(true);

        tokio::time::timeout(Duration::from_secs(5), sweep.run(rx))
            .await
            .unwrap();
        assert_eq!(backend.device(1).unwrap().status, DeviceStatus::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_false_signal_does_not_delay_sweep() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_device(device(1, DeviceStatus::Online, None));
        let trail = AuditTrail::spawn(Arc::new(MemoryAuditSink::new()));
        let sweep = DeviceTimeoutSweep::new(
            backend.clone(),
            trail,
            Duration::from_secs(300),
            Duration::from_secs(60),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sweep.run(rx));

        tokio::time::sleep(Duration::from_secs(50)).await;
        tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(backend.device(1).unwrap().status, DeviceStatus::Timeout);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
