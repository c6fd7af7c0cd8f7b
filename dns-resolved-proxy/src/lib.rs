//! # dns-resolved-proxy
//!
//! Client-side integration with `systemd-resolved`: push per-link DNS
//! settings (name servers, search and routing domains, default-route flag,
//! DNSSEC and DNS-over-TLS modes) without blocking the caller while the
//! resolver is slow, starting up, or timing out.
//!
//! ## Architecture
//!
//! | Component | Role |
//! |-----------|------|
//! | [`Manager`] | Authorisation preflight, owns the background worker, resolves device names to [`Link`]s |
//! | [`Link`] | Blocking reads, queued updates for one interface |
//! | [`BackgroundExecutor`] | Single FIFO worker performing queued calls with bounded retry |
//! | [`ErrorLog`] | Per-link failures of queued calls, drained by [`Link::get_errors`] |
//!
//! The bus is reached through the [`ProxyClient`], [`ServiceDirectory`] and
//! [`InterfaceResolver`] traits, so everything above can run against
//! in-memory implementations.
//!
//! ## Feature Flags
//!
//! - **`dbus`** *(default)*: D-Bus backend ([`DbusProxyClient`],
//!   [`DbusServiceDirectory`], [`Manager::connect_system`]) built on `zbus`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dns_resolved_proxy::{CallOutcome, Manager, ResolvedConfig, SearchDomain};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = Manager::connect_system(ResolvedConfig::default())?;
//!
//!     // None means the resolver has not picked the interface up yet
//!     let Some(link) = manager.retrieve_link("tun0")? else {
//!         return Ok(());
//!     };
//!
//!     println!("servers: {:?}", link.get_dns_servers()?);
//!
//!     // Queued; returns immediately
//!     let update = link.set_domains(&[SearchDomain::new("corp.example", false)])?;
//!     println!("applied: {:?}", update.applied());
//!
//!     if let CallOutcome::Failed(errors) = update.wait() {
//!         eprintln!("SetLinkDomains failed: {errors:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Synchronous operations return [`Result<T, ResolvedError>`](ResolvedError):
//!
//! - [`ResolvedError::Validation`]: unsupported mode string; nothing queued
//! - [`ResolvedError::Integration`]: a blocking read or lookup failed
//! - [`ResolvedError::ResourceExhausted`]: worker stopped or too many tasks outstanding
//! - [`ResolvedError::Config`]: configuration could not be loaded
//!
//! Queued updates never fail the caller. Their failures are reported through
//! the returned [`Completion`], and `SetLinkDefaultRoute` failures are also
//! recorded in the [`ErrorLog`].

mod config;
#[cfg(feature = "dbus")]
mod dbus;
mod error;
mod error_log;
mod executor;
mod introspect;
mod link;
mod manager;
mod traits;
mod types;
mod utils;

#[cfg(test)]
mod test_utils;

pub use config::ResolvedConfig;
pub use error::{IpcError, ResolvedError, Result};
pub use error_log::{ErrorLog, ErrorRecord};
pub use executor::{
    BackgroundExecutor, CallOutcome, CallTask, Completion, ErrorCallback, ExecutorHandle,
    TaskCounter,
};
pub use introspect::{lists_child, split_object_path};
pub use link::Link;
pub use manager::Manager;
pub use traits::{InterfaceResolver, ProxyClient, ServiceDirectory, SystemInterfaces};
pub use types::{
    AF_INET, AF_INET6, DnsOverTlsMode, DnssecMode, MethodArgs, SearchDomain, Target, WireValue,
    decode_address, encode_address,
};

#[cfg(feature = "dbus")]
pub use dbus::{DbusProxyClient, DbusServiceDirectory};
