//! Storage module.
//!
//! Data models, the collaborator traits at the database and cache
//! boundaries, and an in-memory backend used by tests and local runs.

pub mod memory;
pub mod models;
pub mod traits;

pub use memory::*;
pub use models::*;
pub use traits::*;
