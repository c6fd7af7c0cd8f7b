//! Shared test helpers

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use dns_resolved_proxy::{
    InterfaceResolver, IpcError, Manager, MethodArgs, ProxyClient, ResolvedConfig,
    ServiceDirectory, Target, WireValue,
};

/// Skip a test when an environment variable is missing.
#[macro_export]
macro_rules! skip_if_no_env {
    ($($var:expr),+) => {
        $(
            if std::env::var($var).is_err() {
                eprintln!("skipping: {} not set", $var);
                return;
            }
        )+
    };
}

/// Assert `Option` is `Some` and unwrap it (fails the test otherwise).
#[macro_export]
macro_rules! require_some {
    ($expr:expr $(,)?) => {{
        let opt = $expr;
        assert!(opt.is_some(), "expected Some(..), got None");
        let Some(val) = opt else {
            return;
        };
        val
    }};
    ($expr:expr, $($msg:tt)+) => {{
        let opt = $expr;
        assert!(opt.is_some(), "{}", format_args!($($msg)+));
        let Some(val) = opt else {
            return;
        };
        val
    }};
}

/// Assert `Result` is `Ok` and unwrap it (fails the test otherwise).
#[macro_export]
macro_rules! require_ok {
    ($expr:expr $(,)?) => {{
        let res = $expr;
        assert!(res.is_ok(), "expected Ok(..), got {res:?}");
        let Ok(val) = res else {
            return;
        };
        val
    }};
    ($expr:expr, $($msg:tt)+) => {{
        let res = $expr;
        assert!(
            res.is_ok(),
            "{}: {res:?}",
            format_args!($($msg)+)
        );
        let Ok(val) = res else {
            return;
        };
        val
    }};
}

pub const TUN0: &str = "tun0";
pub const TUN0_INDEX: u32 = 7;
pub const TUN0_PATH: &str = "/org/freedesktop/resolve1/link/_37";
pub const TUN1: &str = "tun1";
pub const TUN1_INDEX: u32 = 8;
pub const TUN1_PATH: &str = "/org/freedesktop/resolve1/link/_38";

/// Route library `log` output into the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Millisecond pauses so retry paths finish quickly.
pub fn test_config() -> ResolvedConfig {
    ResolvedConfig {
        retry_backoff_ms: 2,
        wait_poll_interval_ms: 2,
        ..ResolvedConfig::default()
    }
}

// ============ FakeResolver ============

#[derive(Default)]
struct ResolverState {
    links: HashMap<i32, String>,
    /// Objects the probe reports as absent.
    hidden: HashSet<String>,
    properties: HashMap<(String, String), WireValue>,
    calls: Vec<(String, MethodArgs)>,
    failures: VecDeque<IpcError>,
    call_delay: Option<Duration>,
}

/// In-memory stand-in for `systemd-resolved`.
#[derive(Default)]
pub struct FakeResolver {
    state: Mutex<ResolverState>,
}

impl FakeResolver {
    pub fn new() -> Self {
        let resolver = Self::default();
        resolver.add_link(TUN0_INDEX, TUN0_PATH);
        resolver.add_link(TUN1_INDEX, TUN1_PATH);
        resolver
    }

    fn state(&self) -> MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_link(&self, index: u32, path: &str) {
        if let Ok(index) = i32::try_from(index) {
            self.state().links.insert(index, path.to_string());
        }
    }

    /// Make the probe report `path` as not registered.
    pub fn hide_object(&self, path: &str) {
        self.state().hidden.insert(path.to_string());
    }

    pub fn set_property(&self, path: &str, name: &str, value: WireValue) {
        self.state()
            .properties
            .insert((path.to_string(), name.to_string()), value);
    }

    pub fn fail_next_calls(&self, errors: impl IntoIterator<Item = IpcError>) {
        self.state().failures.extend(errors);
    }

    pub fn set_call_delay(&self, delay: Duration) {
        self.state().call_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<(String, MethodArgs)> {
        self.state().calls.clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.state().calls.iter().map(|(m, _)| m.clone()).collect()
    }
}

impl ProxyClient for FakeResolver {
    fn destination(&self) -> &str {
        "org.freedesktop.resolve1"
    }

    fn call(&self, _target: &Target, method: &str, args: &MethodArgs) -> Result<(), IpcError> {
        let (delay, result) = {
            let mut state = self.state();
            state.calls.push((method.to_string(), args.clone()));
            (state.call_delay, state.failures.pop_front().map_or(Ok(()), Err))
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        result
    }

    fn call_object_path(
        &self,
        _target: &Target,
        _method: &str,
        args: &MethodArgs,
    ) -> Result<String, IpcError> {
        let index = args.if_index();
        self.state().links.get(&index).cloned().ok_or_else(|| {
            IpcError::remote(IpcError::NO_SUCH_LINK, format!("Link {index} not known"))
        })
    }

    fn get_property(&self, target: &Target, name: &str) -> Result<WireValue, IpcError> {
        self.state()
            .properties
            .get(&(target.object_path.clone(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                IpcError::remote(
                    "org.freedesktop.DBus.Error.UnknownProperty",
                    format!("Unknown property {name}"),
                )
            })
    }

    fn object_exists(&self, target: &Target) -> Result<bool, IpcError> {
        Ok(!self.state().hidden.contains(&target.object_path))
    }
}

// ============ Bus directory & interfaces ============

pub struct PolkitRunning;

impl ServiceDirectory for PolkitRunning {
    fn start_service_by_name(&self, _name: &str) -> Result<u32, IpcError> {
        Ok(2)
    }

    fn name_owner(&self, _name: &str) -> Result<Option<String>, IpcError> {
        Ok(Some(":1.12".to_string()))
    }
}

pub struct TunInterfaces;

impl InterfaceResolver for TunInterfaces {
    fn name_to_index(&self, name: &str) -> Result<u32, String> {
        match name {
            TUN0 => Ok(TUN0_INDEX),
            TUN1 => Ok(TUN1_INDEX),
            "eth0" => Ok(2),
            _ => Err("No such device".to_string()),
        }
    }
}

// ============ TestContext ============

pub struct TestContext {
    pub resolver: Arc<FakeResolver>,
    pub manager: Manager,
}

impl TestContext {
    pub fn new() -> Option<Self> {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ResolvedConfig) -> Option<Self> {
        init_logging();
        let resolver = Arc::new(FakeResolver::new());
        let client: Arc<dyn ProxyClient> = resolver.clone();
        let manager = Manager::new(client, &PolkitRunning, Arc::new(TunInterfaces), config).ok()?;
        Some(Self { resolver, manager })
    }
}
