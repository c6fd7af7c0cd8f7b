//! Values exchanged with the name-resolution service.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{IpcError, ResolvedError};

/// Linux `AF_INET`.
pub const AF_INET: i32 = 2;
/// Linux `AF_INET6`.
pub const AF_INET6: i32 = 10;

/// A remote object together with the interface a call or property belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub object_path: String,
    pub interface: String,
}

impl Target {
    pub fn new(object_path: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            object_path: object_path.into(),
            interface: interface.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.object_path, self.interface)
    }
}

/// A search or routing domain entry for a link.
///
/// `routing == true` marks a routing-only domain (`~example.com`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchDomain {
    pub search: String,
    pub routing: bool,
}

impl SearchDomain {
    pub fn new(search: impl Into<String>, routing: bool) -> Self {
        Self {
            search: search.into(),
            routing,
        }
    }

    /// Decode a `(sb)` entry.
    pub fn from_wire(value: &WireValue) -> Result<Self, IpcError> {
        match value.as_struct() {
            Some([WireValue::Str(search), WireValue::Bool(routing)]) => Ok(Self {
                search: search.clone(),
                routing: *routing,
            }),
            _ => Err(IpcError::Decode(format!(
                "expected (sb) domain entry, got {value}"
            ))),
        }
    }
}

/// Argument tuples of the mutating resolver methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodArgs {
    /// `(i)`: `RevertLink`, `GetLink`
    Index(i32),
    /// `(ia(iay))`: `SetLinkDNS`
    IndexAddresses(i32, Vec<IpAddr>),
    /// `(ia(sb))`: `SetLinkDomains`
    IndexDomains(i32, Vec<SearchDomain>),
    /// `(ib)`: `SetLinkDefaultRoute`
    IndexBool(i32, bool),
    /// `(is)`: `SetLinkDNSSEC`, `SetLinkDNSOverTLS`
    IndexStr(i32, String),
}

impl MethodArgs {
    /// Interface index every variant starts with.
    pub fn if_index(&self) -> i32 {
        match self {
            Self::Index(i)
            | Self::IndexAddresses(i, _)
            | Self::IndexDomains(i, _)
            | Self::IndexBool(i, _)
            | Self::IndexStr(i, _) => *i,
        }
    }
}

impl fmt::Display for MethodArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "({i},)"),
            Self::IndexAddresses(i, addrs) => {
                let list: Vec<String> = addrs.iter().map(ToString::to_string).collect();
                write!(f, "({i}, [{}])", list.join(", "))
            }
            Self::IndexDomains(i, domains) => {
                let list: Vec<String> = domains
                    .iter()
                    .map(|d| format!("('{}', {})", d.search, d.routing))
                    .collect();
                write!(f, "({i}, [{}])", list.join(", "))
            }
            Self::IndexBool(i, b) => write!(f, "({i}, {b})"),
            Self::IndexStr(i, s) => write!(f, "({i}, '{s}')"),
        }
    }
}

/// Decoded property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireValue {
    Bool(bool),
    Byte(u8),
    Int32(i32),
    UInt32(u32),
    Str(String),
    ObjectPath(String),
    Array(Vec<WireValue>),
    Struct(Vec<WireValue>),
}

impl WireValue {
    pub fn as_struct(&self) -> Option<&[WireValue]> {
        match self {
            Self::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[WireValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::ObjectPath(s) => Some(s),
            _ => None,
        }
    }

    /// Collect an `ay` array.
    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        self.as_array()?
            .iter()
            .map(|v| match v {
                Self::Byte(b) => Some(*b),
                _ => None,
            })
            .collect()
    }

    /// Build an `(iay)` value for an address.
    pub fn address(addr: &IpAddr) -> Self {
        let (family, bytes) = encode_address(addr);
        Self::Struct(vec![
            Self::Int32(family),
            Self::Array(bytes.into_iter().map(Self::Byte).collect()),
        ])
    }
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, items: &[WireValue]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }

        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Byte(b) => write!(f, "0x{b:02x}"),
            Self::Int32(i) => write!(f, "{i}"),
            Self::UInt32(u) => write!(f, "{u}"),
            Self::Str(s) => write!(f, "'{s}'"),
            Self::ObjectPath(p) => write!(f, "objectpath '{p}'"),
            Self::Array(items) => {
                f.write_str("[")?;
                join(f, items)?;
                f.write_str("]")
            }
            Self::Struct(fields) => {
                f.write_str("(")?;
                join(f, fields)?;
                f.write_str(")")
            }
        }
    }
}

/// Encode an address as `(family, bytes)`.
pub fn encode_address(addr: &IpAddr) -> (i32, Vec<u8>) {
    match addr {
        IpAddr::V4(v4) => (AF_INET, v4.octets().to_vec()),
        IpAddr::V6(v6) => (AF_INET6, v6.octets().to_vec()),
    }
}

/// Decode an `(iay)` value.
///
/// Returns `Ok(None)` for the empty `(0, [])` value the resolver uses when no
/// server is set.
pub fn decode_address(value: &WireValue) -> Result<Option<IpAddr>, IpcError> {
    let (family, bytes) = match value.as_struct() {
        Some([WireValue::Int32(family), bytes]) => (*family, bytes.as_bytes()),
        _ => {
            return Err(IpcError::Decode(format!(
                "expected (iay) address, got {value}"
            )))
        }
    };
    let bytes =
        bytes.ok_or_else(|| IpcError::Decode(format!("expected byte array in {value}")))?;

    match family {
        0 if bytes.is_empty() => Ok(None),
        AF_INET => <[u8; 4]>::try_from(bytes.as_slice())
            .map(|octets| Some(IpAddr::V4(Ipv4Addr::from(octets))))
            .map_err(|_| {
                IpcError::Decode(format!("IPv4 address with {} bytes", bytes.len()))
            }),
        AF_INET6 => <[u8; 16]>::try_from(bytes.as_slice())
            .map(|octets| Some(IpAddr::V6(Ipv6Addr::from(octets))))
            .map_err(|_| {
                IpcError::Decode(format!("IPv6 address with {} bytes", bytes.len()))
            }),
        other => Err(IpcError::Decode(format!(
            "unsupported address family {other}"
        ))),
    }
}

/// DNSSEC validation mode of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DnssecMode {
    Yes,
    No,
    AllowDowngrade,
}

impl DnssecMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::AllowDowngrade => "allow-downgrade",
        }
    }
}

impl FromStr for DnssecMode {
    type Err = ResolvedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yes" => Ok(Self::Yes),
            "no" => Ok(Self::No),
            "allow-downgrade" => Ok(Self::AllowDowngrade),
            other => Err(ResolvedError::Validation(format!(
                "Invalid DNSSEC mode requested: {other}"
            ))),
        }
    }
}

impl fmt::Display for DnssecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DNS-over-TLS mode of a link.
///
/// `true`/`false` are accepted as the resolver accepts them; they are sent
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DnsOverTlsMode {
    No,
    False,
    Yes,
    True,
    Opportunistic,
}

impl DnsOverTlsMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::No => "no",
            Self::False => "false",
            Self::Yes => "yes",
            Self::True => "true",
            Self::Opportunistic => "opportunistic",
        }
    }
}

impl FromStr for DnsOverTlsMode {
    type Err = ResolvedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no" => Ok(Self::No),
            "false" => Ok(Self::False),
            "yes" => Ok(Self::Yes),
            "true" => Ok(Self::True),
            "opportunistic" => Ok(Self::Opportunistic),
            other => Err(ResolvedError::Validation(format!(
                "Invalid DNSOverTLS mode requested: {other}"
            ))),
        }
    }
}

impl fmt::Display for DnsOverTlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
