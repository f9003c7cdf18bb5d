//! Structured logging with request context.
//!
//! Provides logging macros and utilities that include the request id and,
//! where known, the device or broker client in every log message.

pub mod structured;

pub use structured::*;
