use crate::error::IpcError;
use crate::types::{MethodArgs, Target, WireValue};

/// Client handle to the remote name-resolution service.
///
/// All methods block for one round trip. Implementations must be shareable
/// across threads: the same client is used by callers issuing reads and by
/// the background worker issuing queued mutations.
pub trait ProxyClient: Send + Sync {
    /// Bus name the client talks to (used for logging).
    fn destination(&self) -> &str;

    /// Invoke a method whose reply carries no data.
    fn call(&self, target: &Target, method: &str, args: &MethodArgs) -> Result<(), IpcError>;

    /// Invoke a method whose reply is a single object path.
    fn call_object_path(
        &self,
        target: &Target,
        method: &str,
        args: &MethodArgs,
    ) -> Result<String, IpcError>;

    /// Read one property of the target object.
    fn get_property(&self, target: &Target, name: &str) -> Result<WireValue, IpcError>;

    /// Whether the target object is currently registered by the service.
    fn object_exists(&self, target: &Target) -> Result<bool, IpcError>;
}

/// Bus-level service lookups used for the authorisation preflight.
pub trait ServiceDirectory {
    /// Ask the bus to activate `name`. Returns the bus reply code
    /// (`1` started, `2` already running).
    fn start_service_by_name(&self, name: &str) -> Result<u32, IpcError>;

    /// Unique name currently owning `name`, if any.
    fn name_owner(&self, name: &str) -> Result<Option<String>, IpcError>;
}

/// Local network-interface name table.
pub trait InterfaceResolver: Send + Sync {
    /// Resolve an interface name to its kernel index.
    fn name_to_index(&self, name: &str) -> Result<u32, String>;
}

/// [`InterfaceResolver`] backed by `if_nametoindex(3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceResolver for SystemInterfaces {
    fn name_to_index(&self, name: &str) -> Result<u32, String> {
        match nix::net::if_::if_nametoindex(name) {
            Ok(0) => Err("no such device".to_string()),
            Ok(index) => Ok(index),
            Err(errno) => Err(errno.desc().to_string()),
        }
    }
}
