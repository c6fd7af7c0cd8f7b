//! Per-interface DNS configuration handle
//!
//! Reads go straight to the resolver and block for one round trip.
//! Writes are validated here, then queued on the manager's background
//! worker; the returned [`Completion`] may be observed or dropped.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::ResolvedConfig;
use crate::error::{IpcError, ResolvedError, Result};
use crate::error_log::{ErrorLog, ErrorRecord};
use crate::executor::{CallTask, Completion, ExecutorHandle};
use crate::traits::ProxyClient;
use crate::types::{
    DnsOverTlsMode, DnssecMode, MethodArgs, SearchDomain, Target, WireValue, decode_address,
};

const SET_DEFAULT_ROUTE: &str = "SetLinkDefaultRoute";

/// Shared state every [`Link`] of one manager points at.
#[derive(Clone)]
pub(crate) struct LinkContext {
    pub client: Arc<dyn ProxyClient>,
    pub executor: ExecutorHandle,
    pub error_log: Arc<ErrorLog>,
    pub config: Arc<ResolvedConfig>,
}

/// One network interface as known to the resolver.
pub struct Link {
    if_index: i32,
    device_name: String,
    link_target: Target,
    manager_target: Target,
    ctx: LinkContext,
    feature_set_default_route: Arc<AtomicBool>,
}

impl Link {
    pub(crate) fn new(
        ctx: LinkContext,
        if_index: i32,
        object_path: impl Into<String>,
        device_name: impl Into<String>,
    ) -> Self {
        let link_target = Target::new(object_path, ctx.config.link_interface.clone());
        let manager_target = Target::new(
            ctx.config.manager_path.clone(),
            ctx.config.manager_interface.clone(),
        );
        Self {
            if_index,
            device_name: device_name.into(),
            link_target,
            manager_target,
            ctx,
            feature_set_default_route: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn if_index(&self) -> i32 {
        self.if_index
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Resolver object path; also the key of this link in the error log.
    pub fn object_path(&self) -> &str {
        &self.link_target.object_path
    }

    /// Whether default-route updates are still attempted.
    ///
    /// Cleared for good by the first failed `SetLinkDefaultRoute`.
    pub fn feature_set_default_route(&self) -> bool {
        self.feature_set_default_route.load(Ordering::SeqCst)
    }

    pub fn outstanding_tasks(&self) -> usize {
        self.ctx.executor.outstanding()
    }

    // ===== Reads =====

    fn property(&self, name: &str, field: &str) -> Result<WireValue> {
        self.ctx
            .client
            .get_property(&self.link_target, name)
            .map_err(|e| retrieve_error(field, &e))
    }

    pub fn get_dns_servers(&self) -> Result<Vec<IpAddr>> {
        const FIELD: &str = "DNS servers";
        let value = self.property("DNS", FIELD)?;
        let entries = value
            .as_array()
            .ok_or_else(|| retrieve_error(FIELD, &unexpected("a(iay)", &value)))?;

        let mut servers = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(addr) = decode_address(entry).map_err(|e| retrieve_error(FIELD, &e))? {
                servers.push(addr);
            }
        }
        Ok(servers)
    }

    /// Server the resolver currently talks to.
    ///
    /// Lookup and decode failures are reported as `None`, the same as
    /// "no server".
    pub fn get_current_dns_server(&self) -> Option<IpAddr> {
        match self
            .ctx
            .client
            .get_property(&self.link_target, "CurrentDNSServer")
            .and_then(|value| decode_address(&value))
        {
            Ok(addr) => addr,
            Err(e) => {
                log::debug!(
                    "[resolved] No current DNS server for {}: {e}",
                    self.device_name
                );
                None
            }
        }
    }

    pub fn get_domains(&self) -> Result<Vec<SearchDomain>> {
        const FIELD: &str = "domains";
        let value = self.property("Domains", FIELD)?;
        value
            .as_array()
            .ok_or_else(|| retrieve_error(FIELD, &unexpected("a(sb)", &value)))?
            .iter()
            .map(|entry| SearchDomain::from_wire(entry).map_err(|e| retrieve_error(FIELD, &e)))
            .collect()
    }

    pub fn get_default_route(&self) -> Result<bool> {
        const FIELD: &str = "DefaultRoute";
        let value = self.property(FIELD, FIELD)?;
        value
            .as_bool()
            .ok_or_else(|| retrieve_error(FIELD, &unexpected("b", &value)))
    }

    pub fn get_dnssec(&self) -> Result<String> {
        self.string_property("DNSSEC", "DNSSEC mode")
    }

    pub fn get_dns_over_tls(&self) -> Result<String> {
        self.string_property("DNSOverTLS", "DNSOverTLS mode")
    }

    fn string_property(&self, name: &str, field: &str) -> Result<String> {
        let value = self.property(name, field)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| retrieve_error(field, &unexpected("s", &value)))
    }

    // ===== Queued updates =====

    fn task(&self, method: &str, args: MethodArgs) -> CallTask {
        CallTask::new(&self.ctx.client, self.manager_target.clone(), method, args)
    }

    /// Replace the link's DNS servers.
    ///
    /// [`Completion::applied`] lists the addresses sent.
    pub fn set_dns_servers(&self, servers: &[IpAddr]) -> Result<Completion> {
        let applied = servers.iter().map(ToString::to_string).collect();
        let args = MethodArgs::IndexAddresses(self.if_index, servers.to_vec());
        self.ctx
            .executor
            .post(self.task("SetLinkDNS", args))
            .map(|c| c.with_applied(applied))
    }

    /// Replace the link's search and routing domains.
    ///
    /// Entries with an empty search string are left out.
    pub fn set_domains(&self, domains: &[SearchDomain]) -> Result<Completion> {
        let domains: Vec<SearchDomain> = domains
            .iter()
            .filter(|d| !d.search.is_empty())
            .cloned()
            .collect();
        let applied = domains.iter().map(|d| d.search.clone()).collect();
        let args = MethodArgs::IndexDomains(self.if_index, domains);
        self.ctx
            .executor
            .post(self.task("SetLinkDomains", args))
            .map(|c| c.with_applied(applied))
    }

    /// Ask the resolver to use (or stop using) this link for the default route.
    ///
    /// Does nothing once a previous attempt has failed; see
    /// [`feature_set_default_route`](Self::feature_set_default_route).
    /// Failures are recorded in the error log.
    pub fn set_default_route(&self, route: bool) -> Result<Completion> {
        if !self.feature_set_default_route() {
            log::debug!(
                "[resolved] Default route updates disabled for {}",
                self.device_name
            );
            return Ok(Completion::skipped());
        }

        let error_log = Arc::clone(&self.ctx.error_log);
        let feature = Arc::clone(&self.feature_set_default_route);
        let link = self.link_target.object_path.clone();
        let task = self
            .task(SET_DEFAULT_ROUTE, MethodArgs::IndexBool(self.if_index, route))
            .on_error(move |errors| {
                for message in errors {
                    error_log.add(&link, SET_DEFAULT_ROUTE, message);
                }
                feature.store(false, Ordering::SeqCst);
                log::warn!("[resolved] Disabled default route updates for {link}");
            });
        self.ctx.executor.post(task)
    }

    pub fn set_dnssec(&self, mode: &str) -> Result<Completion> {
        let mode: DnssecMode = mode.parse()?;
        let args = MethodArgs::IndexStr(self.if_index, mode.as_str().to_string());
        self.ctx.executor.post(self.task("SetLinkDNSSEC", args))
    }

    pub fn set_dns_over_tls(&self, mode: &str) -> Result<Completion> {
        let mode: DnsOverTlsMode = mode.parse()?;
        let args = MethodArgs::IndexStr(self.if_index, mode.as_str().to_string());
        self.ctx.executor.post(self.task("SetLinkDNSOverTLS", args))
    }

    /// Drop every per-link override held by the resolver.
    pub fn revert(&self) -> Result<Completion> {
        self.ctx
            .executor
            .post(self.task("RevertLink", MethodArgs::Index(self.if_index)))
    }

    /// Drain this link's recorded failures.
    pub fn get_errors(&self) -> Vec<ErrorRecord> {
        self.ctx.error_log.take_errors(self.object_path())
    }

    /// Block until the background worker has no outstanding task, from any link.
    ///
    /// Returns without draining once the manager has shut down: tasks left
    /// in the queue then never run.
    pub fn wait_for_outstanding_tasks(&self) {
        self.ctx
            .executor
            .wait_for_outstanding(self.ctx.config.wait_poll_interval());
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("if_index", &self.if_index)
            .field("device_name", &self.device_name)
            .field("object_path", &self.link_target.object_path)
            .field("feature_set_default_route", &self.feature_set_default_route())
            .finish_non_exhaustive()
    }
}

fn retrieve_error(field: &str, cause: &IpcError) -> ResolvedError {
    ResolvedError::Integration(format!("could not retrieve {field}: {cause}"))
}

fn unexpected(signature: &str, value: &WireValue) -> IpcError {
    IpcError::Decode(format!("expected {signature}, got {value}"))
}
