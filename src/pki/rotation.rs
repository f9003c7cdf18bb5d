//! Periodic certificate rotation.
//!
//! One loop per process: sleep, ask the lifecycle manager for a valid
//! certificate, swap it onto the connection if it changed. A failed cycle
//! retries after the short interval instead of the normal period.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use super::connection::ConnectionManager;
use super::lifecycle::CertificateLifecycleManager;

/// Result of one rotation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    Unchanged,
    Rotated { serial_number: String },
    Failed { error: String },
}

pub struct CertificateRotationLoop {
    lifecycle: Arc<CertificateLifecycleManager>,
    connection: Arc<ConnectionManager>,
    interval: Duration,
    retry_interval: Duration,
}

impl CertificateRotationLoop {
    pub fn new(
        lifecycle: Arc<CertificateLifecycleManager>,
        connection: Arc<ConnectionManager>,
        interval: Duration,
        retry_interval: Duration,
    ) -> Self {
        Self {
            lifecycle,
            connection,
            interval,
            retry_interval,
        }
    }

    /// Run a single check-and-swap.
    pub async fn run_cycle(&self) -> RotationOutcome {
        let active = self.connection.active_certificate().await;

        let acquired = match self.lifecycle.acquire_valid(active.as_ref()).await {
            Ok(acquired) => acquired,
            Err(e) => {
                log::error!("CERT_ROTATION_FAILED stage=acquire error={}", e);
                return RotationOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let unchanged = active
            .as_ref()
            .map(|cert| cert.same_issuance(&acquired.certificate))
            .unwrap_or(false);
        if unchanged {
            log::debug!("CERT_ROTATION_SKIPPED reason=still_valid");
            return RotationOutcome::Unchanged;
        }

        let serial_number = acquired.certificate.serial_number.clone();
        match self.connection.swap_credentials(acquired.certificate).await {
            Ok(()) => {
                log::info!("CERT_ROTATED serial={}", serial_number);
                RotationOutcome::Rotated { serial_number }
            }
            Err(e) => {
                log::error!("CERT_ROTATION_FAILED stage=swap serial={} error={}", serial_number, e);
                RotationOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Loop until `shutdown` is true, including when it already is on
    /// entry. An in-progress cycle finishes before the loop observes the
    /// signal.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "CERT_ROTATION_STARTED common_name={} interval_secs={} retry_secs={}",
            self.lifecycle.common_name(),
            self.interval.as_secs(),
            self.retry_interval.as_secs()
        );
        // A `false` notification must not push the next cycle back.
        let mut deadline = Instant::now() + self.interval;
        while !*shutdown.borrow_and_update() {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    let delay = match self.run_cycle().await {
                        RotationOutcome::Failed { .. } => self.retry_interval,
                        _ => self.interval,
                    };
                    deadline = Instant::now() + delay;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        log::info!("CERT_ROTATION_STOPPED");
    }
}
