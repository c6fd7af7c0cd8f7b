//! Smoke test against a real `systemd-resolved`
//!
//! ```bash
//! RESOLVED_TEST_DEVICE=eth0 \
//!     cargo test -p dns-resolved-proxy --test dbus_smoke_test -- --ignored --nocapture
//! ```

#![cfg(feature = "dbus")]

mod common;

use dns_resolved_proxy::{Manager, ResolvedConfig};

#[test]
#[ignore = "integration test: requires the system bus, polkitd and RESOLVED_TEST_DEVICE"]
fn test_read_link_from_system_bus() {
    skip_if_no_env!("RESOLVED_TEST_DEVICE");
    common::init_logging();
    let device = std::env::var("RESOLVED_TEST_DEVICE").unwrap_or_default();

    let manager = require_ok!(
        Manager::connect_system(ResolvedConfig::default()),
        "connecting to systemd-resolved failed"
    );
    let link = require_some!(
        require_ok!(manager.retrieve_link(&device)),
        "{device} is not managed by systemd-resolved"
    );

    let servers = require_ok!(link.get_dns_servers());
    let domains = require_ok!(link.get_domains());
    let dnssec = require_ok!(link.get_dnssec());
    println!(
        "✓ {device} ({}) servers={servers:?} domains={domains:?} dnssec={dnssec} current={:?}",
        link.object_path(),
        link.get_current_dns_server()
    );
}
