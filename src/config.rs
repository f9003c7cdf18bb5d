//! Gateway configuration.
//!
//! Loaded from a TOML file. Every section is optional and falls back to
//! defaults; `validate` rejects values the gateway cannot run with.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::security::rules::{default_system_rules, SystemRule};
use crate::storage::memory::MemoryBackend;
use crate::storage::models::{
    ComponentAttachment, ComponentType, Device, DeviceRelationship, OrganizationMembership, User,
};

/// Top-level settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub acl: AclConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// PKI authority; rotation is disabled without it.
    #[serde(default)]
    pub pki: Option<PkiConfig>,

    #[serde(default)]
    pub seed: SeedFixture,
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen_addr.trim().is_empty() {
            return Err(ConfigError::Validation("server.listen_addr is empty".to_string()));
        }
        if self.telemetry.topic_namespace.trim().is_empty()
            || self.telemetry.topic_namespace.contains(['/', '+', '#'])
        {
            return Err(ConfigError::Validation(format!(
                "telemetry.topic_namespace is not a single topic segment: {:?}",
                self.telemetry.topic_namespace
            )));
        }
        if self.telemetry.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "telemetry.sweep_interval_secs must be positive".to_string(),
            ));
        }
        if let Some(pki) = &self.pki {
            pki.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Shared secret expected in `X-Publish-Secret` on `/publish`.
    pub publish_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            publish_secret: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AclConfig {
    pub superusers: Vec<String>,
    pub system_rules: Vec<SystemRule>,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            superusers: Vec::new(),
            system_rules: default_system_rules(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub topic_namespace: String,
    pub sequence_ttl_secs: u64,
    pub device_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            topic_namespace: "ares4".to_string(),
            sequence_ttl_secs: 7 * 24 * 3600,
            device_timeout_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

impl TelemetryConfig {
    pub fn sequence_ttl(&self) -> Duration {
        Duration::from_secs(self.sequence_ttl_secs)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.device_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_mount() -> String {
    "pki".to_string()
}

fn default_ttl() -> String {
    "720h".to_string()
}

fn default_rotation_interval_secs() -> u64 {
    3600
}

fn default_retry_interval_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct PkiConfig {
    pub address: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_mount")]
    pub mount: String,
    pub role_name: String,
    pub common_name: String,
    #[serde(default = "default_ttl")]
    pub ttl: String,
    #[serde(default = "default_rotation_interval_secs")]
    pub rotation_interval_secs: u64,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl PkiConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::Validation("pki.address is empty".to_string()));
        }
        if self.common_name.trim().is_empty() {
            return Err(ConfigError::Validation("pki.common_name is empty".to_string()));
        }
        if self.role_name.trim().is_empty() {
            return Err(ConfigError::Validation("pki.role_name is empty".to_string()));
        }
        if crate::pki::authority::parse_ttl(&self.ttl).is_none() {
            return Err(ConfigError::Validation(format!("pki.ttl is invalid: {:?}", self.ttl)));
        }
        if self.rotation_interval_secs == 0 || self.retry_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "pki rotation and retry intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Records loaded into the in-memory backend at startup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeedFixture {
    pub devices: Vec<Device>,
    pub component_types: Vec<ComponentType>,
    pub attachments: Vec<ComponentAttachment>,
    pub users: Vec<User>,
    pub memberships: Vec<OrganizationMembership>,
    pub relationships: Vec<DeviceRelationship>,
}

impl SeedFixture {
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.users.is_empty() && self.component_types.is_empty()
    }

    pub fn apply(&self, backend: &MemoryBackend) {
        for device in &self.devices {
            backend.add_device(device.clone());
        }
        for component in &self.component_types {
            backend.add_component_type(component.clone());
        }
        for attachment in &self.attachments {
            backend.attach(attachment.clone());
        }
        for user in &self.users {
            backend.add_user(user.clone());
        }
        for membership in &self.memberships {
            backend.add_membership(membership.clone());
        }
        for relationship in &self.relationships {
            backend.add_relationship(relationship.clone());
        }
        log::info!(
            "SEED_APPLIED devices={} components={} attachments={} users={}",
            self.devices.len(),
            self.component_types.len(),
            self.attachments.len(),
            self.users.len()
        );
    }
}
