//! Per-topic publish/subscribe authorization.
//!
//! Decision order, first match wins:
//! 1. superuser allow-list
//! 2. static system-service rules
//! 3. device extracted from the topic must exist
//! 4. passwordless (mTLS) sessions: self-access only
//! 5. ownership through organization membership or direct link
//!
//! Denials are audited; allows are not.

use std::collections::HashSet;
use std::sync::Arc;

use crate::audit::{AuditEvent, AuditEventType, AuditTrail, Severity};
use crate::logging::structured::LogContext;
use crate::routing::topic::device_id_from_topic;
use crate::storage::models::{Device, OwnershipRole, User};
use crate::storage::traits::{AccountDirectory, DeviceRegistry};

use super::decision::{Access, Decision};
use super::rules::{find_system_rule, SystemRule};

pub const REASON_MALFORMED_TOPIC: &str = "malformed topic";
pub const REASON_DEVICE_NOT_REGISTERED: &str = "device not registered";
pub const REASON_DEVICE_ID_MISMATCH: &str = "device ID mismatch";
pub const REASON_NO_VALID_OWNERSHIP: &str = "no valid ownership";
pub const REASON_SYSTEM_RULE: &str = "system rule";

/// One ACL query as received from the broker.
#[derive(Debug, Clone, Copy)]
pub struct AclRequest<'a> {
    pub username: Option<&'a str>,
    pub client_id: &'a str,
    pub topic: &'a str,
    pub access: Access,
}

pub struct AclEngine {
    superusers: HashSet<String>,
    system_rules: Vec<SystemRule>,
    devices: Arc<dyn DeviceRegistry>,
    accounts: Arc<dyn AccountDirectory>,
    audit: AuditTrail,
}

impl AclEngine {
    pub fn new(
        superusers: impl IntoIterator<Item = String>,
        system_rules: Vec<SystemRule>,
        devices: Arc<dyn DeviceRegistry>,
        accounts: Arc<dyn AccountDirectory>,
        audit: AuditTrail,
    ) -> Self {
        Self {
            superusers: superusers.into_iter().collect(),
            system_rules,
            devices,
            accounts,
            audit,
        }
    }

    pub async fn authorize(&self, request: AclRequest<'_>, ctx: &LogContext) -> Decision {
        let username = request.username.filter(|u| !u.is_empty());

        // Superuser decisions are never logged.
        if let Some(user) = username {
            if self.superusers.contains(user) {
                return Decision::Allow;
            }
        }

        let decision = self.evaluate(username, &request, ctx).await;

        match &decision {
            Decision::Allow => {
                log::debug!(
                    "{} ACL_ALLOW client_id={} topic={} access={}",
                    ctx,
                    request.client_id,
                    request.topic,
                    request.access
                );
            }
            Decision::Deny(reason) => {
                log::warn!(
                    "{} ACL_DENY username={:?} client_id={} topic={} access={} reason={:?}",
                    ctx,
                    username,
                    request.client_id,
                    request.topic,
                    request.access,
                    reason
                );
                self.audit.emit(
                    AuditEvent::new(AuditEventType::AclDenied, "MQTT topic access denied")
                        .actor(username)
                        .severity(Severity::Warning)
                        .detail("username", username.unwrap_or_default())
                        .detail("client_id", request.client_id)
                        .detail("topic", request.topic)
                        .detail("access", request.access)
                        .detail("reason", reason),
                );
            }
        }
        decision
    }

    async fn evaluate(
        &self,
        username: Option<&str>,
        request: &AclRequest<'_>,
        ctx: &LogContext,
    ) -> Decision {
        // Password sessions pick their own client id; only the
        // authenticated username may select a service rule.
        let identity = username.unwrap_or(request.client_id);
        let identifiers = [identity];

        if let Some(rule) = find_system_rule(&self.system_rules, &identifiers, request.topic) {
            log::debug!(
                "{} ACL_SYSTEM_RULE prefix={} filter={} permission={:?}",
                ctx,
                rule.prefix,
                rule.filter,
                rule.permission
            );
            return if rule.permission.grants(request.access) {
                Decision::Allow
            } else {
                Decision::deny(REASON_SYSTEM_RULE)
            };
        }

        let Some(device_uuid) = device_id_from_topic(request.topic) else {
            return Decision::deny(REASON_MALFORMED_TOPIC);
        };

        let device = match self.devices.find_device(device_uuid).await {
            Ok(Some(device)) => device,
            Ok(None) => return Decision::deny(REASON_DEVICE_NOT_REGISTERED),
            Err(e) => {
                log::error!("{} ACL_DEVICE_LOOKUP_FAILED device={} error={}", ctx, device_uuid, e);
                return Decision::deny("device lookup failed");
            }
        };

        let Some(username) = username else {
            // mTLS session: a device may only touch its own topics.
            return if device.uuid == request.client_id {
                Decision::Allow
            } else {
                Decision::deny(REASON_DEVICE_ID_MISMATCH)
            };
        };

        match self.accounts.find_user(username).await {
            Ok(Some(user)) => self.check_ownership(&user, &device, request.access, ctx).await,
            Ok(None) => Decision::deny("user not found"),
            Err(e) => {
                log::error!("{} ACL_USER_LOOKUP_FAILED username={} error={}", ctx, username, e);
                Decision::deny("user lookup failed")
            }
        }
    }

    async fn check_ownership(
        &self,
        user: &User,
        device: &Device,
        access: Access,
        ctx: &LogContext,
    ) -> Decision {
        let memberships = match self.accounts.memberships(user.id).await {
            Ok(m) => m,
            Err(e) => {
                log::error!("{} ACL_MEMBERSHIP_LOOKUP_FAILED user_id={} error={}", ctx, user.id, e);
                return Decision::deny("membership lookup failed");
            }
        };
        let relationships = match self.accounts.device_relationships(device.id).await {
            Ok(r) => r,
            Err(e) => {
                log::error!(
                    "{} ACL_OWNERSHIP_LOOKUP_FAILED device_id={} error={}",
                    ctx,
                    device.id,
                    e
                );
                return Decision::deny("ownership lookup failed");
            }
        };

        let organizations: HashSet<i64> = memberships
            .iter()
            .filter(|m| m.active)
            .map(|m| m.organization_id)
            .collect();

        let granted = relationships
            .iter()
            .filter(|rel| rel.active)
            .filter(|rel| {
                rel.user_id == Some(user.id)
                    || rel
                        .organization_id
                        .map(|org| organizations.contains(&org))
                        .unwrap_or(false)
            })
            .any(|rel| role_grants(rel.role, access));

        if granted {
            Decision::Allow
        } else {
            Decision::deny(REASON_NO_VALID_OWNERSHIP)
        }
    }
}

/// OWNER and OPERATOR may publish and subscribe; VIEWER may only subscribe.
pub fn role_grants(role: OwnershipRole, access: Access) -> bool {
    match role {
        OwnershipRole::Owner | OwnershipRole::Operator => true,
        OwnershipRole::Viewer => access == Access::Subscribe,
    }
}
