//! Entry point: owns the background worker and hands out [`Link`]s.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::ResolvedConfig;
use crate::error::{ResolvedError, Result};
use crate::error_log::ErrorLog;
use crate::executor::BackgroundExecutor;
use crate::link::{Link, LinkContext};
use crate::traits::{InterfaceResolver, ProxyClient, ServiceDirectory};
use crate::types::{MethodArgs, Target};

/// Client-side manager for one name-resolution service.
///
/// Construction verifies the authorisation service is reachable and starts
/// the background worker. Dropping the manager (or calling
/// [`shutdown`](Self::shutdown)) stops and joins the worker; links obtained
/// from it then reject further updates.
pub struct Manager {
    client: Arc<dyn ProxyClient>,
    interfaces: Arc<dyn InterfaceResolver>,
    executor: BackgroundExecutor,
    error_log: Arc<ErrorLog>,
    config: Arc<ResolvedConfig>,
    manager_target: Target,
}

impl Manager {
    pub fn new(
        client: Arc<dyn ProxyClient>,
        directory: &dyn ServiceDirectory,
        interfaces: Arc<dyn InterfaceResolver>,
        config: ResolvedConfig,
    ) -> Result<Self> {
        config.validate()?;
        check_authorization_service(directory, &config.authorization_service)?;

        let mut executor = BackgroundExecutor::new(&config);
        executor.start()?;

        log::info!(
            "[resolved] Manager ready: destination={} ceiling={} attempts={}",
            client.destination(),
            config.max_outstanding_tasks,
            config.retry_attempts
        );

        let manager_target = Target::new(
            config.manager_path.clone(),
            config.manager_interface.clone(),
        );
        Ok(Self {
            client,
            interfaces,
            executor,
            error_log: Arc::new(ErrorLog::new()),
            config: Arc::new(config),
            manager_target,
        })
    }

    /// Look up `device_name` locally and ask the resolver for its link.
    ///
    /// `Ok(None)` means the resolver does not know the interface yet (or any
    /// more); try again later.
    pub fn retrieve_link(&self, device_name: &str) -> Result<Option<Link>> {
        let index = self.interfaces.name_to_index(device_name).map_err(|cause| {
            ResolvedError::Integration(format!(
                "Could not retrieve if_index for '{device_name}': {cause}"
            ))
        })?;
        let if_index = i32::try_from(index).map_err(|_| {
            ResolvedError::Integration(format!(
                "Could not retrieve if_index for '{device_name}': index {index} out of range"
            ))
        })?;

        let path = match self.client.call_object_path(
            &self.manager_target,
            "GetLink",
            &MethodArgs::Index(if_index),
        ) {
            Ok(path) if path.is_empty() => return Ok(None),
            Ok(path) => path,
            Err(e) if e.is_no_such_link() => {
                log::debug!("[resolved] {device_name} (if_index {if_index}) not known yet: {e}");
                return Ok(None);
            }
            Err(e) => {
                return Err(ResolvedError::Integration(format!(
                    "Could not retrieve systemd-resolved path for if_index {if_index}: {e}"
                )));
            }
        };

        log::debug!("[resolved] {device_name} (if_index {if_index}) is {path}");
        let ctx = LinkContext {
            client: Arc::clone(&self.client),
            executor: self.executor.handle(),
            error_log: Arc::clone(&self.error_log),
            config: Arc::clone(&self.config),
        };
        Ok(Some(Link::new(ctx, if_index, path, device_name)))
    }

    pub fn error_log(&self) -> &Arc<ErrorLog> {
        &self.error_log
    }

    /// Links with at least one recorded failure.
    pub fn links_with_errors(&self) -> BTreeSet<String> {
        self.error_log.links()
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn outstanding_tasks(&self) -> usize {
        self.executor.handle().outstanding()
    }

    pub fn is_running(&self) -> bool {
        self.executor.is_running()
    }

    /// Stop and join the background worker. Idempotent.
    ///
    /// Queued tasks that have not started are not run.
    pub fn shutdown(&mut self) {
        if self.executor.is_running() {
            log::debug!(
                "[resolved] Shutting down with {} outstanding task(s)",
                self.outstanding_tasks()
            );
        }
        self.executor.stop();
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("destination", &self.client.destination())
            .field("running", &self.is_running())
            .field("outstanding_tasks", &self.outstanding_tasks())
            .finish_non_exhaustive()
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn check_authorization_service(directory: &dyn ServiceDirectory, service: &str) -> Result<()> {
    let reachable = match directory.start_service_by_name(service) {
        Ok(reply) if reply >= 1 => match directory.name_owner(service) {
            Ok(Some(owner)) if !owner.is_empty() => {
                log::debug!("[resolved] {service} owned by {owner}");
                true
            }
            Ok(_) => false,
            Err(e) => {
                log::debug!("[resolved] Owner lookup for {service} failed: {e}");
                false
            }
        },
        Ok(reply) => {
            log::debug!("[resolved] Starting {service} returned {reply}");
            false
        }
        Err(e) => {
            log::debug!("[resolved] Starting {service} failed: {e}");
            false
        }
    };

    if reachable {
        Ok(())
    } else {
        Err(ResolvedError::Integration(format!(
            "Could not access {service} (polkitd) service. Cannot configure systemd-resolved integration"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IpcError;
    use crate::test_utils::{MockInterfaces, MockProxyClient, MockServiceDirectory, fast_config};

    fn manager_with(
        mock: &Arc<MockProxyClient>,
        directory: &MockServiceDirectory,
    ) -> Result<Manager> {
        let client: Arc<dyn ProxyClient> = mock.clone();
        Manager::new(
            client,
            directory,
            Arc::new(MockInterfaces::with(&[("tun0", 7), ("eth0", 2)])),
            fast_config(),
        )
    }

    #[test]
    fn preflight_rejects_unstartable_service() {
        let mock = Arc::new(MockProxyClient::new());
        let directory = MockServiceDirectory {
            start_reply: Ok(0),
            ..MockServiceDirectory::available()
        };
        let result = manager_with(&mock, &directory);
        assert!(
            matches!(&result, Err(ResolvedError::Integration(msg))
                if msg == "Could not access org.freedesktop.PolicyKit1 (polkitd) service. Cannot configure systemd-resolved integration"),
            "unexpected: {:?}",
            result.as_ref().err()
        );
    }

    #[test]
    fn preflight_rejects_missing_owner() {
        let mock = Arc::new(MockProxyClient::new());
        for owner in [
            Ok(None),
            Ok(Some(String::new())),
            Err(IpcError::Connection("bus gone".into())),
        ] {
            let directory = MockServiceDirectory {
                owner,
                ..MockServiceDirectory::available()
            };
            assert!(matches!(
                manager_with(&mock, &directory),
                Err(ResolvedError::Integration(_))
            ));
        }
    }

    #[test]
    fn preflight_rejects_bus_error() {
        let mock = Arc::new(MockProxyClient::new());
        let directory = MockServiceDirectory {
            start_reply: Err(IpcError::remote("org.freedesktop.DBus.Error.ServiceUnknown", "x")),
            ..MockServiceDirectory::available()
        };
        assert!(manager_with(&mock, &directory).is_err());
    }

    #[test]
    fn invalid_config_rejected_before_preflight() {
        let mock = Arc::new(MockProxyClient::new());
        let client: Arc<dyn ProxyClient> = mock.clone();
        let config = ResolvedConfig {
            retry_attempts: 0,
            ..fast_config()
        };
        let result = Manager::new(
            client,
            &MockServiceDirectory::available(),
            Arc::new(MockInterfaces::default()),
            config,
        );
        assert!(matches!(result, Err(ResolvedError::Config(_))));
    }

    #[test]
    fn retrieve_known_link() {
        let mock = Arc::new(MockProxyClient::new());
        mock.add_link(7, "/org/freedesktop/resolve1/link/_37");
        let manager = manager_with(&mock, &MockServiceDirectory::available());
        assert!(manager.is_ok());
        let Ok(manager) = manager else {
            return;
        };
        assert!(manager.is_running());

        let link = manager.retrieve_link("tun0");
        assert!(
            matches!(&link, Ok(Some(l))
                if l.if_index() == 7
                    && l.device_name() == "tun0"
                    && l.object_path() == "/org/freedesktop/resolve1/link/_37"
                    && l.feature_set_default_route()),
            "unexpected: {link:?}"
        );
    }

    #[test]
    fn link_unknown_to_resolver_is_none() {
        let mock = Arc::new(MockProxyClient::new());
        let manager = manager_with(&mock, &MockServiceDirectory::available());
        assert!(matches!(
            manager.map(|m| m.retrieve_link("eth0")),
            Ok(Ok(None))
        ));
    }

    #[test]
    fn unknown_device_is_integration_error() {
        let mock = Arc::new(MockProxyClient::new());
        let manager = manager_with(&mock, &MockServiceDirectory::available());
        let result = manager.map(|m| m.retrieve_link("nope0"));
        assert!(
            matches!(&result, Ok(Err(ResolvedError::Integration(msg)))
                if msg == "Could not retrieve if_index for 'nope0': No such device"),
            "unexpected: {result:?}"
        );
    }

    #[test]
    fn shutdown_stops_links() {
        let mock = Arc::new(MockProxyClient::new());
        mock.add_link(7, "/org/freedesktop/resolve1/link/_37");
        let manager = manager_with(&mock, &MockServiceDirectory::available());
        assert!(manager.is_ok());
        let Ok(mut manager) = manager else {
            return;
        };
        let link = manager.retrieve_link("tun0");
        assert!(matches!(link, Ok(Some(_))));
        let Ok(Some(link)) = link else {
            return;
        };

        manager.shutdown();
        manager.shutdown();
        assert!(!manager.is_running());
        assert!(matches!(
            link.revert(),
            Err(ResolvedError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn errors_are_visible_through_manager() {
        let mock = Arc::new(MockProxyClient::new());
        mock.add_link(7, "/org/freedesktop/resolve1/link/_37");
        mock.set_object_exists(false);
        let manager = manager_with(&mock, &MockServiceDirectory::available());
        assert!(manager.is_ok());
        let Ok(manager) = manager else {
            return;
        };
        let link = manager.retrieve_link("tun0");
        assert!(matches!(link, Ok(Some(_))));
        let Ok(Some(link)) = link else {
            return;
        };

        assert!(link.set_default_route(true).is_ok());
        link.wait_for_outstanding_tasks();

        assert_eq!(manager.outstanding_tasks(), 0);
        assert!(manager
            .links_with_errors()
            .contains("/org/freedesktop/resolve1/link/_37"));
        assert_eq!(
            manager
                .error_log()
                .num_errors("/org/freedesktop/resolve1/link/_37"),
            1
        );
    }
}
