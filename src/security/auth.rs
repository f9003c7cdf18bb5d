//! Connection-level authentication for broker webhooks.
//!
//! Two credential shapes are accepted:
//! - username + password: application users (password verification is
//!   the account service's concern; existence decides here)
//! - client id only: mTLS "hailing" by a device whose certificate the
//!   broker has already verified

use std::sync::Arc;

use crate::audit::{AuditEvent, AuditEventType, AuditTrail, Severity};
use crate::logging::structured::LogContext;
use crate::storage::models::Device;
use crate::storage::traits::{AccountDirectory, DeviceRegistry};

use super::decision::Decision;

pub struct BrokerAuthEngine {
    accounts: Arc<dyn AccountDirectory>,
    devices: Arc<dyn DeviceRegistry>,
    audit: AuditTrail,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

impl BrokerAuthEngine {
    pub fn new(
        accounts: Arc<dyn AccountDirectory>,
        devices: Arc<dyn DeviceRegistry>,
        audit: AuditTrail,
    ) -> Self {
        Self {
            accounts,
            devices,
            audit,
        }
    }

    /// Decide whether a broker connection may proceed.
    ///
    /// Every terminal branch records exactly one audit event.
    pub async fn authenticate(
        &self,
        username: Option<&str>,
        password: Option<&str>,
        client_id: Option<&str>,
        ctx: &LogContext,
    ) -> Decision {
        let username = present(username);
        let password = present(password);
        let client_id = present(client_id);

        match (username, password, client_id) {
            (Some(username), Some(_), _) => self.authenticate_user(username, client_id, ctx).await,
            (_, None, Some(client_id)) => self.authenticate_device(client_id, ctx).await,
            _ => {
                log::warn!(
                    "{} AUTH_DENY reason=missing_credentials username={:?} client_id={:?}",
                    ctx,
                    username,
                    client_id
                );
                self.audit.emit(
                    AuditEvent::new(AuditEventType::AuthFailed, "Missing broker credentials")
                        .actor(username)
                        .severity(Severity::Warning)
                        .detail("client_id", client_id.unwrap_or_default())
                        .detail("reason", "missing credentials"),
                );
                Decision::deny("missing credentials")
            }
        }
    }

    async fn authenticate_user(
        &self,
        username: &str,
        client_id: Option<&str>,
        ctx: &LogContext,
    ) -> Decision {
        let decision = match self.accounts.find_user(username).await {
            Ok(Some(user)) => {
                log::info!("{} AUTH_SUCCESS username={} user_id={}", ctx, username, user.id);
                self.audit.emit(
                    AuditEvent::new(AuditEventType::AuthSuccess, "Broker login accepted")
                        .actor(Some(username))
                        .detail("client_id", client_id.unwrap_or_default())
                        .detail("user_id", user.id),
                );
                Decision::Allow
            }
            Ok(None) => {
                log::warn!("{} AUTH_DENY reason=unknown_user username={}", ctx, username);
                Decision::deny("user not found")
            }
            Err(e) => {
                log::error!("{} AUTH_LOOKUP_FAILED username={} error={}", ctx, username, e);
                Decision::deny("account lookup failed")
            }
        };

        if let Decision::Deny(reason) = &decision {
            self.audit.emit(
                AuditEvent::new(AuditEventType::AuthFailed, "Broker login rejected")
                    .actor(Some(username))
                    .severity(Severity::Warning)
                    .detail("client_id", client_id.unwrap_or_default())
                    .detail("reason", reason),
            );
        }
        decision
    }

    async fn authenticate_device(&self, client_id: &str, ctx: &LogContext) -> Decision {
        let ctx = ctx.with_subject(client_id);
        let device = match self.devices.find_device(client_id).await {
            Ok(device) => device,
            Err(e) => {
                log::error!("{} DEVICE_AUTH_LOOKUP_FAILED error={}", ctx, e);
                None
            }
        };

        // The existence check records its own failure event.
        let Some(device) = validate_device_exists(device.as_ref(), client_id, &self.audit, &ctx)
        else {
            return Decision::deny("device not registered");
        };

        log::info!(
            "{} DEVICE_AUTH_SUCCESS device_id={} status={}",
            ctx,
            device.id,
            device.status
        );
        self.audit.emit(
            AuditEvent::new(AuditEventType::DeviceAuthSuccess, "Device mTLS hail accepted")
                .actor(Some(client_id))
                .detail("device_id", device.id)
                .detail("status", device.status),
        );
        Decision::Allow
    }
}

/// Device-existence validation for mTLS hailing.
///
/// Emits `DEVICE_AUTH_FAILED` on the failure path.
pub fn validate_device_exists<'a>(
    device: Option<&'a Device>,
    client_id: &str,
    audit: &AuditTrail,
    ctx: &LogContext,
) -> Option<&'a Device> {
    if device.is_none() {
        log::warn!("{} DEVICE_AUTH_DENY reason=device_not_registered", ctx);
        audit.emit(
            AuditEvent::new(AuditEventType::DeviceAuthFailed, "Unknown device attempted mTLS hail")
                .actor(Some(client_id))
                .severity(Severity::Warning)
                .detail("client_id", client_id)
                .detail("reason", "device not registered"),
        );
    }
    device
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::storage::memory::MemoryBackend;
    use crate::storage::models::{DeviceStatus, User};

    fn engine() -> (BrokerAuthEngine, Arc<MemoryAuditSink>, AuditTrail) {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_user(User {
            id: 7,
            username: "alice".to_string(),
        });
        backend.add_device(Device {
            id: 1,
            uuid: "D1".to_string(),
            cpu_serial: None,
            hmac_secret: None,
            status: DeviceStatus::Online,
            last_seen_at: None,
        });
        let sink = Arc::new(MemoryAuditSink::new());
        let trail = AuditTrail::spawn(sink.clone());
        (
            BrokerAuthEngine::new(backend.clone(), backend, trail.clone()),
            sink,
            trail,
        )
    }

    #[tokio::test]
    async fn test_password_login_known_user() {
        let (engine, sink, trail) = engine();
        let ctx = LogContext::new("t");
        let decision = engine
            .authenticate(Some("alice"), Some("pw"), Some("app-1"), &ctx)
            .await;
        trail.flush().await;

        assert!(decision.is_allowed());
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0].event_type, AuditEventType::AuthSuccess);
    }

    #[tokio::test]
    async fn test_password_login_unknown_user() {
        let (engine, sink, trail) = engine();
        let ctx = LogContext::new("t");
        let decision = engine.authenticate(Some("bob"), Some("pw"), None, &ctx).await;
        trail.flush().await;

        assert_eq!(decision, Decision::deny("user not found"));
        assert_eq!(sink.of_type(AuditEventType::AuthFailed).len(), 1);
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_mtls_hail() {
        let (engine, sink, trail) = engine();
        let ctx = LogContext::new("t");

        assert!(engine.authenticate(None, None, Some("D1"), &ctx).await.is_allowed());
        assert!(!engine.authenticate(None, None, Some("D9"), &ctx).await.is_allowed());
        trail.flush().await;

        assert_eq!(sink.of_type(AuditEventType::DeviceAuthSuccess).len(), 1);
        assert_eq!(sink.of_type(AuditEventType::DeviceAuthFailed).len(), 1);
        assert_eq!(sink.events().len(), 2);
    }

    #[tokio::test]
    async fn test_no_credentials() {
        let (engine, sink, trail) = engine();
        let ctx = LogContext::new("t");
        let decision = engine.authenticate(Some(""), None, None, &ctx).await;
        trail.flush().await;

        assert_eq!(decision, Decision::deny("missing credentials"));
        assert_eq!(sink.events().len(), 1);
    }
}
