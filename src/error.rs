//! Error types for the external boundaries.
//!
//! Expected "not allowed" outcomes are decisions, not errors. The enums
//! here cover infrastructure faults and malformed input only.

use thiserror::Error;

/// Database-side failures (device registry, telemetry, batch tracking).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Shared key-value cache failures.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt cache entry for {key}: {value}")]
    Corrupt { key: String, value: String },
}

/// Audit sink write failures.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink rejected event: {0}")]
    Rejected(String),

    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// PKI issuing authority failures.
#[derive(Debug, Error)]
pub enum PkiError {
    #[error("PKI request failed: {0}")]
    Transport(String),

    #[error("PKI authority returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("PKI response malformed: {0}")]
    Malformed(String),
}

/// Broker connection failures.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connect failed: {0}")]
    Connect(String),

    #[error("broker not connected")]
    NotConnected,

    #[error("publish failed: {0}")]
    Publish(String),
}

/// Configuration load and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Validation(String),
}

/// Batch ledger failures.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("batch not found: {0}")]
    NotFound(String),

    #[error("invalid batch request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a telemetry message was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("{0}")]
    NotFound(String),

    #[error("device status is {0}, expected ONLINE")]
    DeviceState(String),

    #[error("integrity check failed: {reason}")]
    Integrity { reason: String, critical: bool },

    #[error("telemetry could not be stored")]
    Persistence,

    #[error("lookup failed: {0}")]
    Infrastructure(String),
}
