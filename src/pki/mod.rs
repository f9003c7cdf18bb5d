//! Server certificate lifecycle.
//!
//! - `certificate` - in-memory certificate bundle and the renewal threshold
//! - `authority` - PKI issuing authority contract and HTTP client
//! - `lifecycle` - reuse-or-reissue decision
//! - `connection` - live broker session guarded for credential swaps
//! - `rotation` - periodic rotation task

pub mod authority;
pub mod certificate;
pub mod connection;
pub mod lifecycle;
pub mod rotation;

pub use authority::*;
pub use certificate::*;
pub use connection::*;
pub use lifecycle::*;
pub use rotation::*;
