//! HTTP surface.
//!
//! Broker webhooks (`/auth`, `/acl`, `/superuser`), the internal publish
//! bridge, HTTP telemetry and the batch-ledger routes.

pub mod error;
pub mod handlers;
pub mod router;

pub use error::*;
pub use handlers::*;
pub use router::*;
