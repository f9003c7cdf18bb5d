//! Per-message context.
//!
//! Carries the identifiers used to correlate every log line of one
//! telemetry message through the admission pipeline.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::logging::structured::LogContext;
use crate::routing::topic::device_id_from_topic;

/// How a telemetry message reached the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Mqtt,
    Http,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Mqtt => "mqtt",
            Transport::Http => "http",
        }
    }
}

/// Context for a single inbound telemetry message.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub message_id: String,
    pub topic: String,
    pub transport: Transport,
    pub received_at: DateTime<Utc>,
}

impl MessageContext {
    pub fn new(topic: &str, transport: Transport) -> Self {
        Self {
            message_id: format!("msg-{}", &Uuid::new_v4().to_string()[..8]),
            topic: topic.to_string(),
            transport,
            received_at: Utc::now(),
        }
    }

    pub fn log_context(&self) -> LogContext {
        let ctx = LogContext::new(&self.message_id);
        match device_id_from_topic(&self.topic) {
            Some(device) => ctx.with_subject(device),
            None => ctx,
        }
    }
}
