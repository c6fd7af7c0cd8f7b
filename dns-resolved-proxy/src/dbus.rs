//! D-Bus backend on the system bus (`zbus`, blocking API).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use zbus::DBusError;
use zbus::blocking::Connection;
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};

use crate::config::ResolvedConfig;
use crate::error::{IpcError, ResolvedError, Result};
use crate::introspect::{self, MIN_INTROSPECTION_LEN};
use crate::manager::Manager;
use crate::traits::{ProxyClient, ServiceDirectory, SystemInterfaces};
use crate::types::{MethodArgs, Target, WireValue, encode_address};

const BUS_NAME: &str = "org.freedesktop.DBus";
const BUS_PATH: &str = "/org/freedesktop/DBus";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";
const NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";
const TIMEOUT_ERRORS: [&str; 3] = [
    "org.freedesktop.DBus.Error.NoReply",
    "org.freedesktop.DBus.Error.Timeout",
    "org.freedesktop.DBus.Error.TimedOut",
];

const INTROSPECTION_ATTEMPTS: u32 = 3;
const INTROSPECTION_RETRY_DELAY: Duration = Duration::from_millis(100);

/// [`ProxyClient`] for one destination on a D-Bus connection.
#[derive(Clone)]
pub struct DbusProxyClient {
    connection: Connection,
    destination: String,
}

impl DbusProxyClient {
    pub fn new(connection: Connection, destination: impl Into<String>) -> Self {
        Self {
            connection,
            destination: destination.into(),
        }
    }

    fn invoke<B>(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        body: &B,
    ) -> std::result::Result<zbus::Message, IpcError>
    where
        B: serde::Serialize + zbus::zvariant::DynamicType,
    {
        self.connection
            .call_method(
                Some(self.destination.as_str()),
                path,
                Some(interface),
                method,
                body,
            )
            .map_err(map_zbus_error)
    }

    fn dispatch(
        &self,
        target: &Target,
        method: &str,
        args: &MethodArgs,
    ) -> std::result::Result<zbus::Message, IpcError> {
        let (path, iface) = (target.object_path.as_str(), target.interface.as_str());
        match args {
            MethodArgs::Index(index) => self.invoke(path, iface, method, &(*index,)),
            MethodArgs::IndexAddresses(index, addrs) => {
                let addrs: Vec<(i32, Vec<u8>)> = addrs.iter().map(encode_address).collect();
                self.invoke(path, iface, method, &(*index, addrs))
            }
            MethodArgs::IndexDomains(index, domains) => {
                let domains: Vec<(&str, bool)> = domains
                    .iter()
                    .map(|d| (d.search.as_str(), d.routing))
                    .collect();
                self.invoke(path, iface, method, &(*index, domains))
            }
            MethodArgs::IndexBool(index, flag) => {
                self.invoke(path, iface, method, &(*index, *flag))
            }
            MethodArgs::IndexStr(index, value) => {
                self.invoke(path, iface, method, &(*index, value.as_str()))
            }
        }
    }

    fn introspect(&self, path: &str) -> std::result::Result<String, IpcError> {
        self.invoke(path, INTROSPECTABLE_INTERFACE, "Introspect", &())?
            .body()
            .deserialize::<String>()
            .map_err(map_zbus_error)
    }
}

impl ProxyClient for DbusProxyClient {
    fn destination(&self) -> &str {
        &self.destination
    }

    fn call(
        &self,
        target: &Target,
        method: &str,
        args: &MethodArgs,
    ) -> std::result::Result<(), IpcError> {
        self.dispatch(target, method, args).map(|_| ())
    }

    fn call_object_path(
        &self,
        target: &Target,
        method: &str,
        args: &MethodArgs,
    ) -> std::result::Result<String, IpcError> {
        let reply = self.dispatch(target, method, args)?;
        let path: OwnedObjectPath = reply.body().deserialize().map_err(map_zbus_error)?;
        Ok(path.as_str().to_string())
    }

    fn get_property(
        &self,
        target: &Target,
        name: &str,
    ) -> std::result::Result<WireValue, IpcError> {
        let reply = self.invoke(
            &target.object_path,
            PROPERTIES_INTERFACE,
            "Get",
            &(target.interface.as_str(), name),
        )?;
        let value: OwnedValue = reply.body().deserialize().map_err(map_zbus_error)?;
        to_wire_value(&value)
    }

    fn object_exists(&self, target: &Target) -> std::result::Result<bool, IpcError> {
        let (parent, child) = introspect::split_object_path(&target.object_path)?;

        let mut xml = String::new();
        for attempt in 1..=INTROSPECTION_ATTEMPTS {
            xml = self.introspect(parent)?;
            if xml.len() > MIN_INTROSPECTION_LEN {
                break;
            }
            if attempt < INTROSPECTION_ATTEMPTS {
                thread::sleep(INTROSPECTION_RETRY_DELAY);
            }
        }
        Ok(introspect::lists_child(&xml, parent, child))
    }
}

/// [`ServiceDirectory`] answered by the bus daemon itself.
#[derive(Clone)]
pub struct DbusServiceDirectory {
    connection: Connection,
}

impl DbusServiceDirectory {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    fn bus_call<B, R>(&self, method: &str, body: &B) -> std::result::Result<R, IpcError>
    where
        B: serde::Serialize + zbus::zvariant::DynamicType,
        R: for<'de> serde::Deserialize<'de> + zbus::zvariant::Type,
    {
        self.connection
            .call_method(Some(BUS_NAME), BUS_PATH, Some(BUS_NAME), method, body)
            .and_then(|reply| reply.body().deserialize::<R>())
            .map_err(map_zbus_error)
    }
}

impl ServiceDirectory for DbusServiceDirectory {
    fn start_service_by_name(&self, name: &str) -> std::result::Result<u32, IpcError> {
        self.bus_call("StartServiceByName", &(name, 0_u32))
    }

    fn name_owner(&self, name: &str) -> std::result::Result<Option<String>, IpcError> {
        match self.bus_call::<_, String>("GetNameOwner", &(name,)) {
            Ok(owner) => Ok(Some(owner)),
            Err(IpcError::Remote { name, .. }) if name == NAME_HAS_NO_OWNER => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Manager {
    /// Manager talking to `systemd-resolved` on the system bus.
    pub fn connect_system(config: ResolvedConfig) -> Result<Self> {
        let connection = Connection::system().map_err(|e| {
            ResolvedError::Integration(format!("Could not connect to the system bus: {e}"))
        })?;
        let client = Arc::new(DbusProxyClient::new(
            connection.clone(),
            config.service_name.clone(),
        ));
        let directory = DbusServiceDirectory::new(connection);
        Self::new(client, &directory, Arc::new(SystemInterfaces), config)
    }
}

fn map_zbus_error(error: zbus::Error) -> IpcError {
    match error {
        zbus::Error::MethodError(name, detail, _) => {
            remote_error(name.as_str(), detail.unwrap_or_default())
        }
        zbus::Error::FDO(fdo) => match *fdo {
            zbus::fdo::Error::ZBus(inner) => map_zbus_error(inner),
            other => remote_error(
                other.name().as_str(),
                other.description().unwrap_or_default().to_string(),
            ),
        },
        zbus::Error::InputOutput(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            IpcError::Timeout(io.to_string())
        }
        zbus::Error::Variant(e) => IpcError::Decode(e.to_string()),
        other => IpcError::Connection(other.to_string()),
    }
}

fn remote_error(name: &str, message: String) -> IpcError {
    if TIMEOUT_ERRORS.contains(&name) {
        IpcError::Timeout(message)
    } else {
        IpcError::remote(name, message)
    }
}

fn to_wire_value(value: &Value<'_>) -> std::result::Result<WireValue, IpcError> {
    Ok(match value {
        Value::Bool(b) => WireValue::Bool(*b),
        Value::U8(b) => WireValue::Byte(*b),
        Value::I32(i) => WireValue::Int32(*i),
        Value::U32(u) => WireValue::UInt32(*u),
        Value::Str(s) => WireValue::Str(s.as_str().to_string()),
        Value::ObjectPath(p) => WireValue::ObjectPath(p.as_str().to_string()),
        Value::Value(inner) => to_wire_value(inner)?,
        Value::Array(array) => WireValue::Array(
            array
                .iter()
                .map(to_wire_value)
                .collect::<std::result::Result<_, _>>()?,
        ),
        Value::Structure(structure) => WireValue::Struct(
            structure
                .fields()
                .iter()
                .map(to_wire_value)
                .collect::<std::result::Result<_, _>>()?,
        ),
        other => {
            return Err(IpcError::Decode(format!(
                "unsupported value of type {}",
                other.value_signature()
            )))
        }
    })
}
