//! Utility modules.

/// Length limits for method arguments written to the log.
pub mod log_sanitizer;
