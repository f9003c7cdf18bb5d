//! Broker-facing trust decisions.
//!
//! - `auth` - connection-level authentication (password login, mTLS hailing)
//! - `acl` - per-topic publish/subscribe authorization
//! - `rules` - static superuser and system-service rule tables

pub mod acl;
pub mod auth;
pub mod decision;
pub mod rules;

pub use acl::*;
pub use auth::*;
pub use decision::*;
pub use rules::*;
