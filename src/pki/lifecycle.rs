//! Reuse-or-reissue decision for the server certificate.
//!
//! The manager never touches the live broker connection; callers apply
//! the credential it returns.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::audit::{AuditEvent, AuditEventType, AuditTrail};
use crate::error::PkiError;
use crate::logging::structured::LogContext;

use super::authority::{CertificateRequest, PkiAuthority};
use super::certificate::{CertificateValidity, ServerCertificate};

/// How the returned certificate was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    Reused,
    AcquiredNew { reason: String },
}

#[derive(Debug, Clone)]
pub struct AcquiredCertificate {
    pub certificate: ServerCertificate,
    pub acquisition: Acquisition,
}

impl AcquiredCertificate {
    pub fn is_new(&self) -> bool {
        matches!(self.acquisition, Acquisition::AcquiredNew { .. })
    }
}

pub struct CertificateLifecycleManager {
    authority: Arc<dyn PkiAuthority>,
    request: CertificateRequest,
    audit: AuditTrail,
}

impl CertificateLifecycleManager {
    pub fn new(authority: Arc<dyn PkiAuthority>, request: CertificateRequest, audit: AuditTrail) -> Self {
        Self {
            authority,
            request,
            audit,
        }
    }

    pub fn common_name(&self) -> &str {
        &self.request.common_name
    }

    pub async fn acquire_valid(
        &self,
        current: Option<&ServerCertificate>,
    ) -> Result<AcquiredCertificate, PkiError> {
        self.acquire_valid_at(current, Utc::now()).await
    }

    /// Reuse `current` while it is outside the renewal window, otherwise
    /// issue a fresh certificate. Exactly one audit event per success.
    pub async fn acquire_valid_at(
        &self,
        current: Option<&ServerCertificate>,
        now: DateTime<Utc>,
    ) -> Result<AcquiredCertificate, PkiError> {
        let ctx = LogContext::new("cert").with_subject(&self.request.common_name);

        let reason = match current.map(|cert| (cert, cert.validity_at(now))) {
            Some((cert, CertificateValidity::Valid { remaining })) => {
                log::info!(
                    "{} CERT_REUSED serial={} remaining_hours={}",
                    ctx,
                    cert.serial_number,
                    remaining.num_hours()
                );
                self.audit.emit(
                    AuditEvent::new(AuditEventType::CertificateReused, "Server certificate reused")
                        .detail("common_name", &self.request.common_name)
                        .detail("serial_number", &cert.serial_number)
                        .detail("expiration", cert.expiration.to_rfc3339()),
                );
                return Ok(AcquiredCertificate {
                    certificate: cert.clone(),
                    acquisition: Acquisition::Reused,
                });
            }
            Some((_, validity)) => validity
                .reason()
                .unwrap_or_else(|| "certificate invalid".to_string()),
            None => "no current certificate".to_string(),
        };

        log::info!(
            "{} CERT_REQUEST authority={} role={} reason={:?}",
            ctx,
            self.authority.name(),
            self.request.role_name,
            reason
        );
        let issued = match self.authority.issue(&self.request).await {
            Ok(cert) => cert,
            Err(e) => {
                log::error!("{} CERT_ISSUE_FAILED error={}", ctx, e);
                return Err(e);
            }
        };

        log::info!(
            "{} CERT_ACQUIRED_NEW serial={} expiration={}",
            ctx,
            issued.serial_number,
            issued.expiration.to_rfc3339()
        );
        self.audit.emit(
            AuditEvent::new(AuditEventType::CertificateAcquiredNew, "Server certificate issued")
                .detail("common_name", &self.request.common_name)
                .detail("serial_number", &issued.serial_number)
                .detail("expiration", issued.expiration.to_rfc3339())
                .detail("reason", &reason),
        );
        Ok(AcquiredCertificate {
            certificate: issued,
            acquisition: Acquisition::AcquiredNew { reason },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingAuthority {
        issued: AtomicUsize,
        failing: AtomicBool,
    }

    #[async_trait]
    impl PkiAuthority for CountingAuthority {
        async fn issue(&self, request: &CertificateRequest) -> Result<ServerCertificate, PkiError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(PkiError::Transport("connection refused".to_string()));
            }
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            let issued_at = Utc::now();
            Ok(ServerCertificate {
                certificate: "CERT".to_string(),
                private_key: "KEY".to_string(),
                issuing_ca: "CA".to_string(),
                serial_number: format!("serial-{}", n),
                common_name: request.common_name.clone(),
                issued_at,
                expiration: issued_at + Duration::hours(720),
            })
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn manager() -> (CertificateLifecycleManager, Arc<CountingAuthority>, Arc<MemoryAuditSink>, AuditTrail) {
        let authority = Arc::new(CountingAuthority {
            issued: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        });
        let sink = Arc::new(MemoryAuditSink::new());
        let trail = AuditTrail::spawn(sink.clone());
        let request = CertificateRequest {
            common_name: "ares-server".to_string(),
            role_name: "ares-server".to_string(),
        };
        (
            CertificateLifecycleManager::new(authority.clone(), request, trail.clone()),
            authority,
            sink,
            trail,
        )
    }

    #[tokio::test]
    async fn test_absent_then_reused() {
        let (manager, authority, sink, trail) = manager();

        let first = manager.acquire_valid(None).await.unwrap();
        assert!(first.is_new());
        let second = manager.acquire_valid(Some(&first.certificate)).await.unwrap();
        assert_eq!(second.acquisition, Acquisition::Reused);
        assert!(second.certificate.same_issuance(&first.certificate));
        trail.flush().await;

        assert_eq!(authority.issued.load(Ordering::SeqCst), 1);
        assert_eq!(sink.of_type(AuditEventType::CertificateAcquiredNew).len(), 1);
        assert_eq!(sink.of_type(AuditEventType::CertificateReused).len(), 1);
    }

    #[tokio::test]
    async fn test_expiring_certificate_is_replaced_with_reason() {
        let (manager, _, sink, trail) = manager();
        let first = manager.acquire_valid(None).await.unwrap().certificate;

        let later = first.issued_at + Duration::hours(700);
        let renewed = manager.acquire_valid_at(Some(&first), later).await.unwrap();
        trail.flush().await;

        match &renewed.acquisition {
            Acquisition::AcquiredNew { reason } => assert!(reason.contains("expiring soon")),
            other => panic!("unexpected acquisition {:?}", other),
        }
        assert!(!renewed.certificate.same_issuance(&first));
        let events = sink.of_type(AuditEventType::CertificateAcquiredNew);
        assert!(events[1].details["reason"].contains("expiring soon"));
    }

    #[tokio::test]
    async fn test_expired_certificate_is_replaced() {
        let (manager, _, _, _) = manager();
        let first = manager.acquire_valid(None).await.unwrap().certificate;

        let after = first.expiration + Duration::minutes(1);
        let renewed = manager.acquire_valid_at(Some(&first), after).await.unwrap();
        assert_eq!(
            renewed.acquisition,
            Acquisition::AcquiredNew {
                reason: "certificate expired".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_authority_failure_propagates_without_audit() {
        let (manager, authority, sink, trail) = manager();
        authority.failing.store(true, Ordering::SeqCst);

        assert!(manager.acquire_valid(None).await.is_err());
        trail.flush().await;
        assert!(sink.events().is_empty());
    }
}
