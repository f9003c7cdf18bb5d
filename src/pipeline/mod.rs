//! Telemetry pipeline module.
//!
//! Coordinates telemetry admission and the ingestion bookkeeping around it:
//! - Per-message admission (device, component, integrity, attachment, commit)
//! - Sequence gap reconciliation against the shared cache
//! - Bulk-ingestion batch ledger and purge permission
//! - Device-timeout sweep

pub mod admission;
pub mod batch;
pub mod context;
pub mod payload;
pub mod sequence;
pub mod sweep;

pub use admission::*;
pub use batch::*;
pub use context::*;
pub use payload::*;
pub use sequence::*;
pub use sweep::*;
