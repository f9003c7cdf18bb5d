//! Topic routing module.
//!
//! MQTT topic-filter matching and the topic conventions used to route
//! device traffic:
//! - `<namespace>/<device>/telemetry/...` - telemetry admission
//! - `<namespace>/<device>/images/...` - image ingestion

pub mod topic;

pub use topic::*;
