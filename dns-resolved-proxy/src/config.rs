//! Runtime configuration
//!
//! Every field has a default matching the behaviour expected from a
//! `systemd-resolved` deployment, so an empty JSON object is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ResolvedError, Result};

/// Configuration for [`Manager`](crate::Manager) and the objects it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolvedConfig {
    /// Bus name of the name-resolution service.
    pub service_name: String,
    /// Object path of the resolver's manager object.
    pub manager_path: String,
    /// Interface carrying the `SetLink*` / `GetLink` methods.
    pub manager_interface: String,
    /// Interface of the per-link objects.
    pub link_interface: String,
    /// Service that must be reachable before mutating calls can be authorised.
    pub authorization_service: String,
    /// Attempts per queued call, including the first.
    pub retry_attempts: u32,
    /// Fixed pause between attempts, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Ceiling for queued-but-unfinished calls.
    pub max_outstanding_tasks: usize,
    /// Re-check period for `wait_for_outstanding_tasks`, in milliseconds.
    pub wait_poll_interval_ms: u64,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            service_name: "org.freedesktop.resolve1".to_string(),
            manager_path: "/org/freedesktop/resolve1".to_string(),
            manager_interface: "org.freedesktop.resolve1.Manager".to_string(),
            link_interface: "org.freedesktop.resolve1.Link".to_string(),
            authorization_service: "org.freedesktop.PolicyKit1".to_string(),
            retry_attempts: 3,
            retry_backoff_ms: 1000,
            max_outstanding_tasks: usize::from(u16::MAX),
            wait_poll_interval_ms: 1000,
        }
    }
}

impl ResolvedConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ResolvedError::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ResolvedError::Config(format!("could not read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&content)
    }

    /// Reject settings the executor cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.retry_attempts == 0 {
            return Err(ResolvedError::Config(
                "retryAttempts must be at least 1".to_string(),
            ));
        }
        if self.max_outstanding_tasks == 0 {
            return Err(ResolvedError::Config(
                "maxOutstandingTasks must be at least 1".to_string(),
            ));
        }
        for (field, value) in [
            ("serviceName", &self.service_name),
            ("managerPath", &self.manager_path),
            ("managerInterface", &self.manager_interface),
            ("linkInterface", &self.link_interface),
            ("authorizationService", &self.authorization_service),
        ] {
            if value.is_empty() {
                return Err(ResolvedError::Config(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms)
    }
}
