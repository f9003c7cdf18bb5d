//! Structured logging utilities.
//!
//! Every decision point logs an UPPER_SNAKE event name followed by
//! `key=value` pairs, prefixed by a [`LogContext`] for correlation.

use std::fmt;

use uuid::Uuid;

/// Logging context for a single webhook call or telemetry message.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub request_id: String,
    pub subject: Option<String>,
}

impl LogContext {
    pub fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            subject: None,
        }
    }

    /// Context with a freshly generated short request id.
    pub fn generate() -> Self {
        Self::new(&Uuid::new_v4().to_string()[..8])
    }

    /// Same request, scoped to a device uuid or broker client id.
    pub fn with_subject(&self, subject: &str) -> Self {
        Self {
            request_id: self.request_id.clone(),
            subject: Some(subject.to_string()),
        }
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Some(subject) => write!(f, "[req={}] [subject={}]", self.request_id, subject),
            None => write!(f, "[req={}]", self.request_id),
        }
    }
}

/// Initialize the process-wide logger.
///
/// Safe to call more than once; later calls are ignored. `RUST_LOG`
/// overrides the default `info` filter.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

/// Log an info message with context.
#[macro_export]
macro_rules! log_info {
    ($ctx:expr, $event:expr, $($key:ident = $value:expr),* $(,)?) => {
        log::info!(
            "{} {} {}",
            $ctx,
            $event,
            format_args!(concat!($(stringify!($key), "={:?} "),*), $($value),*)
        );
    };
}

/// Log a warning message with context.
#[macro_export]
macro_rules! log_warn {
    ($ctx:expr, $event:expr, $($key:ident = $value:expr),* $(,)?) => {
        log::warn!(
            "{} {} {}",
            $ctx,
            $event,
            format_args!(concat!($(stringify!($key), "={:?} "),*), $($value),*)
        );
    };
}

/// Log an error message with context.
#[macro_export]
macro_rules! log_error {
    ($ctx:expr, $event:expr, $($key:ident = $value:expr),* $(,)?) => {
        log::error!(
            "{} {} {}",
            $ctx,
            $event,
            format_args!(concat!($(stringify!($key), "={:?} "),*), $($value),*)
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_context_display() {
        let ctx = LogContext::new("req-123");
        assert_eq!(format!("{}", ctx), "[req=req-123]");

        let scoped = ctx.with_subject("device-456");
        assert_eq!(format!("{}", scoped), "[req=req-123] [subject=device-456]");
    }

    #[test]
    fn test_generated_context_is_short() {
        let ctx = LogContext::generate();
        assert_eq!(ctx.request_id.len(), 8);
        assert!(ctx.subject.is_none());
    }
}
