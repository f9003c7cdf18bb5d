//! Ares Trust Core - device trust and telemetry admission
//!
//! This crate decides, for every broker connection and every published
//! device message, whether it may proceed, and keeps the server's own
//! broker identity valid. The implementation prioritizes:
//!
//! 1. **Security** - fail closed on every lookup or integrity fault
//! 2. **Logging** - every decision point logged with request context
//! 3. **Atomicity** - telemetry is committed whole or not at all
//!
//! ## Architecture
//!
//! The crate is organized into modules:
//! - `security` - broker authentication and per-topic ACL decisions
//! - `validation` - canonical payload encoding, HMAC and CPU-serial checks
//! - `pipeline` - telemetry admission, sequence gaps, batch ledger, timeout sweep
//! - `pki` - server certificate lifecycle, broker connection, rotation loop
//! - `routing` - MQTT topic matching and topic conventions
//! - `storage` - data models, collaborator traits, in-memory backend
//! - `audit` - audit events and the asynchronous audit outbox
//! - `http` - axum router for broker webhooks and the publish bridge
//! - `config` - TOML settings
//! - `logging` - structured logging with request context

pub mod audit;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod pipeline;
pub mod pki;
pub mod routing;
pub mod security;
pub mod storage;
pub mod validation;

pub use audit::{AuditEvent, AuditEventType, AuditTrail};
pub use config::Settings;
pub use pipeline::admission::TelemetryAdmission;
pub use pipeline::batch::BatchLedger;
pub use pipeline::sequence::SequenceCache;
pub use pki::lifecycle::CertificateLifecycleManager;
pub use pki::rotation::CertificateRotationLoop;
pub use routing::topic::topic_matches;
pub use security::acl::AclEngine;
pub use security::auth::BrokerAuthEngine;
pub use security::decision::{Access, Decision};
pub use validation::integrity::IntegrityValidator;
