//! Per-message integrity checks.
//!
//! Verifies the HMAC-SHA256 signature of a telemetry payload against the
//! device's secret and binds the payload to the registered CPU serial.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::audit::{AuditEvent, AuditEventType, AuditTrail};
use crate::error::StoreError;
use crate::logging::structured::LogContext;
use crate::storage::models::Device;
use crate::storage::traits::DeviceRegistry;

use super::canonical::{signing_bytes, SIGNATURE_FIELD};

type HmacSha256 = Hmac<Sha256>;

/// Length in bytes of newly enrolled device secrets.
const ENROLLED_SECRET_BYTES: usize = 32;

/// Result of an integrity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityCheck {
    pub valid: bool,
    pub reason: Option<String>,
    /// Possible hardware tampering; audited at critical severity.
    pub critical: bool,
}

impl IntegrityCheck {
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
            critical: false,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self {
            valid: false,
            reason: Some(reason.to_string()),
            critical: false,
        }
    }

    pub fn critical(reason: &str) -> Self {
        Self {
            valid: false,
            reason: Some(reason.to_string()),
            critical: true,
        }
    }
}

/// Lowercase hex HMAC-SHA256 of `message` under `secret`.
pub fn compute_hmac(secret: &[u8], message: &[u8]) -> Result<String, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Signature a device would attach to `payload`.
pub fn sign_payload(secret: &str, payload: &Value) -> Result<String, InvalidLength> {
    compute_hmac(secret.as_bytes(), &signing_bytes(payload))
}

/// Constant-time comparison of two hex digests, case-insensitive.
fn digests_match(expected_hex: &str, provided_hex: &str) -> bool {
    let (Ok(expected), Ok(provided)) = (
        hex::decode(expected_hex),
        hex::decode(provided_hex.to_ascii_lowercase()),
    ) else {
        return false;
    };
    if expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(provided.as_slice()).into()
}

pub struct IntegrityValidator {
    devices: Arc<dyn DeviceRegistry>,
    audit: AuditTrail,
}

impl IntegrityValidator {
    pub fn new(devices: Arc<dyn DeviceRegistry>, audit: AuditTrail) -> Self {
        Self { devices, audit }
    }

    /// The payload's `cpu_serial` must equal the registered serial.
    pub fn validate_cpu_serial(&self, device: &Device, payload: &Value, ctx: &LogContext) -> IntegrityCheck {
        let Some(registered) = device.cpu_serial.as_deref().filter(|s| !s.is_empty()) else {
            log::warn!("{} CPU_SERIAL_UNREGISTERED device_id={}", ctx, device.id);
            return IntegrityCheck::rejected("device has no registered cpu_serial");
        };

        let Some(claimed) = payload.get("cpu_serial").and_then(|v| v.as_str()) else {
            log::warn!("{} CPU_SERIAL_MISSING device_id={}", ctx, device.id);
            return IntegrityCheck::rejected("payload missing cpu_serial");
        };

        if claimed != registered {
            log::error!(
                "{} CRITICAL CPU_SERIAL_MISMATCH device_id={} registered={} claimed={} note=possible_storage_medium_swap",
                ctx,
                device.id,
                registered,
                claimed
            );
            return IntegrityCheck::critical("cpu_serial mismatch: possible storage-medium swap");
        }

        log::debug!("{} CPU_SERIAL_VERIFIED device_id={}", ctx, device.id);
        IntegrityCheck::valid()
    }

    /// Verify the payload signature against the device secret.
    pub fn validate_hmac(&self, device: &Device, payload: &Value, ctx: &LogContext) -> IntegrityCheck {
        let Some(secret) = device.hmac_secret.as_deref().filter(|s| !s.is_empty()) else {
            log::warn!("{} HMAC_SKIP reason=no_secret device_id={}", ctx, device.id);
            return IntegrityCheck::rejected("device has no HMAC secret");
        };

        let Some(provided) = payload.get(SIGNATURE_FIELD).and_then(|v| v.as_str()) else {
            log::warn!("{} HMAC_SKIP reason=no_signature device_id={}", ctx, device.id);
            return IntegrityCheck::rejected("missing signature");
        };

        let expected = match compute_hmac(secret.as_bytes(), &signing_bytes(payload)) {
            Ok(digest) => digest,
            Err(e) => {
                log::error!("{} HMAC_KEY_INVALID device_id={} error={}", ctx, device.id, e);
                return IntegrityCheck::rejected("invalid HMAC secret");
            }
        };
        if digests_match(&expected, provided) {
            log::debug!("{} HMAC_VERIFY device_id={} valid=true", ctx, device.id);
            IntegrityCheck::valid()
        } else {
            log::warn!("{} HMAC_MISMATCH device_id={}", ctx, device.id);
            IntegrityCheck::rejected("HMAC signature mismatch")
        }
    }

    /// Give a device its HMAC secret if it has none yet.
    ///
    /// Returns the device's secret, new or existing.
    pub async fn enroll_secret(&self, device: &Device, ctx: &LogContext) -> Result<String, StoreError> {
        if let Some(existing) = device.hmac_secret.as_deref().filter(|s| !s.is_empty()) {
            log::info!("{} SECRET_ENROLL_SKIP reason=already_enrolled device_id={}", ctx, device.id);
            return Ok(existing.to_string());
        }

        let mut raw = [0u8; ENROLLED_SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut raw);
        let secret = general_purpose::URL_SAFE_NO_PAD.encode(raw);

        self.devices.set_hmac_secret(device.id, &secret).await?;

        log::info!("{} SECRET_ENROLLED device_id={}", ctx, device.id);
        self.audit.emit(
            AuditEvent::new(AuditEventType::DeviceSecretEnrolled, "Device HMAC secret enrolled")
                .actor(Some(&device.uuid))
                .detail("device_id", device.id),
        );
        Ok(secret)
    }
}
