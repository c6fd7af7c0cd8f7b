//! Test helpers
//!
//! In-memory stand-ins for the bus, the bus directory and the interface table.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::ResolvedConfig;
use crate::error::IpcError;
use crate::traits::{InterfaceResolver, ProxyClient, ServiceDirectory};
use crate::types::{MethodArgs, Target, WireValue};

/// Config with millisecond pauses so retry paths finish quickly.
pub fn fast_config() -> ResolvedConfig {
    ResolvedConfig {
        retry_backoff_ms: 5,
        wait_poll_interval_ms: 5,
        ..ResolvedConfig::default()
    }
}

// ===== MockProxyClient =====

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub target: Target,
    pub method: String,
    pub args: MethodArgs,
}

#[derive(Default)]
struct MockState {
    calls: Vec<RecordedCall>,
    /// Consumed one per call, before `failing_methods` is consulted.
    next_failures: VecDeque<IpcError>,
    failing_methods: HashMap<String, IpcError>,
    missing_objects: bool,
    probes: usize,
    panic_message: Option<String>,
    properties: HashMap<(String, String), Result<WireValue, IpcError>>,
    links: HashMap<i32, String>,
}

pub struct MockProxyClient {
    state: Mutex<MockState>,
}

impl MockProxyClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_next_calls(&self, errors: Vec<IpcError>) {
        self.state().next_failures.extend(errors);
    }

    pub fn fail_method(&self, method: &str, error: IpcError) {
        self.state().failing_methods.insert(method.to_string(), error);
    }

    pub fn set_object_exists(&self, exists: bool) {
        self.state().missing_objects = !exists;
    }

    pub fn panic_on_call(&self, message: &str) {
        self.state().panic_message = Some(message.to_string());
    }

    pub fn clear_panic(&self) {
        self.state().panic_message = None;
    }

    pub fn set_property(&self, path: &str, name: &str, value: WireValue) {
        self.state()
            .properties
            .insert((path.to_string(), name.to_string()), Ok(value));
    }

    pub fn fail_property(&self, path: &str, name: &str, error: IpcError) {
        self.state()
            .properties
            .insert((path.to_string(), name.to_string()), Err(error));
    }

    pub fn add_link(&self, if_index: i32, path: &str) {
        self.state().links.insert(if_index, path.to_string());
    }

    /// Method names of every attempted call, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.iter().map(|c| c.method.clone()).collect()
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    pub fn probe_count(&self) -> usize {
        self.state().probes
    }
}

impl ProxyClient for MockProxyClient {
    fn destination(&self) -> &str {
        "org.freedesktop.resolve1"
    }

    #[allow(clippy::panic)]
    fn call(&self, target: &Target, method: &str, args: &MethodArgs) -> Result<(), IpcError> {
        let (panic_message, result) = {
            let mut state = self.state();
            state.calls.push(RecordedCall {
                target: target.clone(),
                method: method.to_string(),
                args: args.clone(),
            });
            let result = match state.next_failures.pop_front() {
                Some(error) => Err(error),
                None => state
                    .failing_methods
                    .get(method)
                    .cloned()
                    .map_or(Ok(()), Err),
            };
            (state.panic_message.clone(), result)
        };

        if let Some(message) = panic_message {
            panic!("{message}");
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
            .unwrap_or_else(|| {
                Err(IpcError::remote(
                    "org.freedesktop.DBus.Error.UnknownProperty",
                    format!("Unknown property {name}"),
                ))
            })
    }

    fn object_exists(&self, _target: &Target) -> Result<bool, IpcError> {
        let mut state = self.state();
        state.probes += 1;
        Ok(!state.missing_objects)
    }
}

// ===== MockServiceDirectory =====

pub struct MockServiceDirectory {
    pub start_reply: Result<u32, IpcError>,
    pub owner: Result<Option<String>, IpcError>,
}

impl MockServiceDirectory {
    pub fn available() -> Self {
        Self {
            start_reply: Ok(2),
            owner: Ok(Some(":1.7".to_string())),
        }
    }
}

impl ServiceDirectory for MockServiceDirectory {
    fn start_service_by_name(&self, _name: &str) -> Result<u32, IpcError> {
        self.start_reply.clone()
    }

    fn name_owner(&self, _name: &str) -> Result<Option<String>, IpcError> {
        self.owner.clone()
    }
}

// ===== MockInterfaces =====

#[derive(Default)]
pub struct MockInterfaces {
    names: HashMap<String, u32>,
}

impl MockInterfaces {
    pub fn with(entries: &[(&str, u32)]) -> Self {
        Self {
            names: entries
                .iter()
                .map(|(name, index)| ((*name).to_string(), *index))
                .collect(),
        }
    }
}

impl InterfaceResolver for MockInterfaces {
    fn name_to_index(&self, name: &str) -> Result<u32, String> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| "No such device".to_string())
    }
}
