//! Message integrity module.
//!
//! - Canonical JSON encoding shared with device firmware
//! - HMAC-SHA256 signature verification against per-device secrets
//! - Hardware serial (CPU serial) binding checks
//! - Per-device secret enrollment

pub mod canonical;
pub mod integrity;

pub use canonical::*;
pub use integrity::*;
