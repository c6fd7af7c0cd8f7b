//! Per-link store of background call failures
//!
//! Failures of queued calls cannot be returned to the caller that queued them,
//! so they are parked here until someone drains them with [`ErrorLog::take_errors`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    /// Remote method that failed (e.g. `SetLinkDefaultRoute`).
    pub operation: String,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            recorded_at: Utc::now(),
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.operation, self.message)
    }
}

/// Thread-safe mapping of link object path to its pending failures.
///
/// A single lock covers the whole map. A link with no pending records is
/// never present as a key.
#[derive(Debug, Default)]
pub struct ErrorLog {
    records: Mutex<HashMap<String, Vec<ErrorRecord>>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<ErrorRecord>>> {
        // A writer panicking mid-push cannot leave the map inconsistent.
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Append a record for `link`.
    pub fn add(&self, link: &str, operation: &str, message: &str) {
        self.lock()
            .entry(link.to_string())
            .or_default()
            .push(ErrorRecord::new(operation, message));
    }

    /// Links with at least one pending record.
    pub fn links(&self) -> BTreeSet<String> {
        self.lock().keys().cloned().collect()
    }

    /// Number of pending records for `link`; 0 if none.
    pub fn num_errors(&self, link: &str) -> usize {
        self.lock().get(link).map_or(0, Vec::len)
    }

    /// Remove and return every pending record for `link`, oldest first.
    pub fn take_errors(&self, link: &str) -> Vec<ErrorRecord> {
        self.lock().remove(link).unwrap_or_default()
    }
}
