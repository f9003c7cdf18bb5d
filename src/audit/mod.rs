//! Audit side channel.
//!
//! Trust decisions are recorded as [`AuditEvent`]s through an
//! [`AuditTrail`] outbox so a failing audit sink never blocks or alters
//! an admission decision.

pub mod events;
pub mod outbox;

pub use events::*;
pub use outbox::*;
