use serde::Serialize;
use thiserror::Error;

/// Error returned by [`ProxyClient`](crate::ProxyClient) and
/// [`ServiceDirectory`](crate::ServiceDirectory) implementations.
///
/// Backends map their transport errors onto these variants so the executor
/// can tell a timeout apart from a remote rejection without parsing messages.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", content = "details")]
pub enum IpcError {
    /// The remote side did not answer in time.
    #[error("Timeout was reached: {0}")]
    Timeout(String),

    /// The remote service answered with a named error.
    #[error("{name}: {message}")]
    Remote {
        /// Error name as reported by the bus (e.g. `org.freedesktop.resolve1.NoSuchLink`).
        name: String,
        /// Human-readable message attached to the error.
        message: String,
    },

    /// The connection to the bus failed or was lost.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A reply or property value did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl IpcError {
    /// Error name `systemd-resolved` uses when an interface index is unknown to it.
    pub const NO_SUCH_LINK: &'static str = "org.freedesktop.resolve1.NoSuchLink";

    pub fn remote(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            name: name.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Whether the remote service reported that the requested link does not exist.
    #[must_use]
    pub fn is_no_such_link(&self) -> bool {
        matches!(self, Self::Remote { name, .. } if name == Self::NO_SUCH_LINK)
    }
}

/// Library error type.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", content = "details")]
pub enum ResolvedError {
    /// Caller supplied an out-of-range value; nothing was queued.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A synchronous round trip to the remote service failed or returned
    /// data that could not be decoded.
    #[error("{0}")]
    Integration(String),

    /// The background executor refused a task: it is stopped or the
    /// outstanding-task ceiling has been reached.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ResolvedError {
    /// Whether the error is an expected outcome of caller input, used for log levels.
    ///
    /// `true` should be logged as `warn`, `false` as `error`.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Config(_))
    }
}

/// Convenience type alias for `Result<T, ResolvedError>`.
pub type Result<T> = std::result::Result<T, ResolvedError>;
