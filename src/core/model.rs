//! Network object model
//!
//! Typed records for the five configuration tables:
//!
//! - [`Host`]: one network interface of a host (`hostname:iface` is the key)
//! - [`Network`]: a named IPv4 network, always stored in canonical form
//! - [`HostGroup`]: a named set of hosts, networks and other groups
//! - [`Service`]: a protocol with optional ports
//! - [`Rule`]: a declarative ACCEPT/DROP rule between two endpoints
//!
//! Records reference each other by name only. Names are resolved at compile
//! time by [`crate::core::compiler`] and [`crate::core::flatten`].

use crate::core::error::{Error, Result};
use crate::validators;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Name of the network that never contains anything.
pub const INTERNET: &str = "Internet";

/// Wildcard used for "any endpoint" and "any service".
pub const ANY: &str = "*";

/// Highest syslog level accepted by the LOG target
pub const MAX_LOG_LEVEL: u8 = 7;

/// Network protocols supported in service definitions
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Protocol {
    #[strum(serialize = "AH")]
    Ah,
    #[strum(serialize = "ESP")]
    Esp,
    #[strum(serialize = "ICMP")]
    Icmp,
    #[strum(serialize = "IP")]
    Ip,
    #[strum(serialize = "TCP")]
    Tcp,
    #[strum(serialize = "UDP")]
    Udp,
}

impl Protocol {
    /// Lowercase name as used by `iptables -p`
    pub const fn as_iptables(self) -> &'static str {
        match self {
            Protocol::Ah => "ah",
            Protocol::Esp => "esp",
            Protocol::Icmp => "icmp",
            Protocol::Ip => "ip",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }

    /// Protocols that have a dedicated iptables match module with port options
    pub const fn has_port_module(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp | Protocol::Icmp)
    }
}

/// Rule action
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum Action {
    #[default]
    #[strum(serialize = "ACCEPT")]
    Accept,
    #[strum(serialize = "DROP")]
    Drop,
}

/// iptables filter chain
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum Chain {
    #[strum(serialize = "INPUT")]
    Input,
    #[strum(serialize = "OUTPUT")]
    Output,
    #[strum(serialize = "FORWARD")]
    Forward,
}

/// Returns the network address of `ip` for the given mask length.
pub fn net_addr(ip: Ipv4Addr, masklen: u8) -> Ipv4Addr {
    Ipv4Network::new(ip, masklen).map_or(ip, |n| n.network())
}

/// One network interface of a host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Host {
    pub hostname: String,
    pub iface: String,
    pub ip_addr: Ipv4Addr,
    pub masklen: u8,
    pub local_fw: bool,
    pub network_fw: bool,
    pub mng: bool,
    /// Names of networks routed through this interface
    #[serde(default)]
    pub routed: Vec<String>,
}

impl Host {
    /// Table key, `hostname:iface`
    pub fn key(&self) -> String {
        format!("{}:{}", self.hostname, self.iface)
    }

    /// iptables representation
    pub fn ipt(&self) -> String {
        format!("{}/32", self.ip_addr)
    }

    /// The unnamed network the interface is directly connected to
    pub fn mynetwork(&self) -> Network {
        Network::new("", self.ip_addr, self.masklen)
    }

    /// A host is "contained" in another host only when they share the address.
    pub fn contains(&self, other: &Host) -> bool {
        self.ip_addr == other.ip_addr
    }

    /// Checks field constraints not enforced by the types.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an empty hostname, an invalid interface
    /// name or a mask length above 32.
    pub fn validate(&self) -> Result<()> {
        if self.hostname.is_empty() || self.hostname.contains(':') {
            return Err(Error::config(format!(
                "Invalid hostname '{}'",
                self.hostname
            )));
        }
        validators::validate_interface(&self.iface).map_err(Error::Config)?;
        if self.masklen > 32 {
            return Err(Error::config(format!(
                "Invalid netmask length '{}' on {}",
                self.masklen,
                self.key()
            )));
        }
        Ok(())
    }
}

/// A named IPv4 network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Network {
    pub name: String,
    pub ip_addr: Ipv4Addr,
    pub masklen: u8,
}

impl Network {
    /// Creates a network, clearing the host bits of `ip_addr`.
    pub fn new(name: impl Into<String>, ip_addr: Ipv4Addr, masklen: u8) -> Self {
        Self {
            name: name.into(),
            ip_addr: net_addr(ip_addr, masklen),
            masklen,
        }
    }

    /// Sets address and mask length, canonicalizing the address.
    ///
    /// Returns `true` when the given address had host bits set and was corrected.
    pub fn update(&mut self, ip_addr: Ipv4Addr, masklen: u8) -> bool {
        let real_addr = net_addr(ip_addr, masklen);
        self.ip_addr = real_addr;
        self.masklen = masklen;
        real_addr != ip_addr
    }

    /// iptables representation
    pub fn ipt(&self) -> String {
        format!("{}/{}", self.ip_addr, self.masklen)
    }

    /// Checks the mask length.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a mask length above 32.
    pub fn validate(&self) -> Result<()> {
        if self.masklen > 32 {
            return Err(Error::config(format!(
                "Invalid netmask length '{}' on network {}",
                self.masklen, self.name
            )));
        }
        Ok(())
    }

    pub fn is_internet(&self) -> bool {
        self.name == INTERNET
    }

    /// Tells if a host address falls inside this network.
    pub fn contains_host(&self, host: &Host) -> bool {
        if self.is_internet() {
            return false;
        }
        net_addr(host.ip_addr, self.masklen) == self.ip_addr
    }

    /// Tells if another network is entirely inside this network.
    pub fn contains_network(&self, other: &Network) -> bool {
        if self.is_internet() {
            return false;
        }
        net_addr(other.ip_addr, self.masklen) == self.ip_addr && other.masklen >= self.masklen
    }

    /// Containment test for a resolved endpoint.
    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        match endpoint {
            Endpoint::Host(h) => self.contains_host(h),
            Endpoint::Network(n) => self.contains_network(n),
        }
    }
}

/// A named group of hosts, networks and other groups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostGroup {
    pub name: String,
    #[serde(default)]
    pub childs: Vec<String>,
}

/// A network service using one protocol and one, many or no ports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    pub protocol: Protocol,
    pub ports: String,
}

impl Service {
    /// Parses and validates a service definition.
    ///
    /// Ports are checked against the protocol: port blocks for TCP/UDP, an
    /// ICMP type for ICMP, and forced empty for the other protocols.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unsupported protocol or invalid ports.
    pub fn new(name: impl Into<String>, protocol: &str, ports: &str) -> Result<Self> {
        let protocol: Protocol = protocol
            .parse()
            .map_err(|_| Error::config(format!("Unsupported protocol: '{protocol}'")))?;
        let ports = Self::checked_ports(protocol, ports.trim())?;
        Ok(Self {
            name: name.into(),
            protocol,
            ports,
        })
    }

    /// Replaces protocol and ports after validation.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the new definition is invalid; the service is
    /// left untouched in that case.
    pub fn update(&mut self, protocol: &str, ports: &str) -> Result<()> {
        let updated = Self::new(self.name.clone(), protocol, ports)?;
        *self = updated;
        Ok(())
    }

    fn checked_ports(protocol: Protocol, ports: &str) -> Result<String> {
        match protocol {
            Protocol::Tcp | Protocol::Udp => {
                validators::validate_port_list(ports).map_err(Error::Config)?;
                Ok(ports.to_string())
            }
            Protocol::Icmp => {
                validators::validate_icmp_type(ports).map_err(Error::Config)?;
                Ok(ports.to_string())
            }
            // Supported protocol that has no ports
            Protocol::Ah | Protocol::Esp | Protocol::Ip => Ok(String::new()),
        }
    }
}

/// A declarative firewall rule.
///
/// `action` and `log_level` are kept as written in the table and checked when
/// the rule is compiled, so a disabled draft rule never prevents loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    pub enabled: bool,
    pub name: String,
    pub src: String,
    pub src_serv: String,
    pub dst: String,
    pub dst_serv: String,
    pub action: String,
    pub log_level: String,
    #[serde(default)]
    pub desc: String,
}

impl Rule {
    /// The placeholder rule inserted by "add" without fields
    pub fn placeholder() -> Self {
        Self {
            enabled: false,
            name: "new".to_string(),
            src: ANY.to_string(),
            src_serv: ANY.to_string(),
            dst: ANY.to_string(),
            dst_serv: ANY.to_string(),
            action: Action::Accept.to_string(),
            log_level: "0".to_string(),
            desc: String::new(),
        }
    }

    /// Parses the action field.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` unless the action is `ACCEPT` or `DROP`.
    pub fn parsed_action(&self) -> Result<Action> {
        self.action.parse().map_err(|_| {
            Error::config(format!(
                "The Action field must be \"ACCEPT\" or \"DROP\" in rule \"{}\"",
                self.name
            ))
        })
    }

    /// Parses the log level field: 0 disables logging, 1 to 7 are syslog levels.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the field is not an integer between 0 and 7.
    pub fn parsed_log_level(&self) -> Result<u8> {
        let level: i64 = self.log_level.trim().parse().map_err(|_| {
            Error::config(format!(
                "The logging field in rule '{}' is '{}' and must be an integer.",
                self.name, self.log_level
            ))
        })?;
        u8::try_from(level)
            .ok()
            .filter(|l| *l <= MAX_LOG_LEVEL)
            .ok_or_else(|| {
                Error::config(format!(
                    "Logging level {level} of rule '{}' must be between 0 and {MAX_LOG_LEVEL}.",
                    self.name
                ))
            })
    }
}

/// A resolved rule endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Host(Host),
    Network(Network),
}

impl Endpoint {
    pub fn ip_addr(&self) -> Ipv4Addr {
        match self {
            Endpoint::Host(h) => h.ip_addr,
            Endpoint::Network(n) => n.ip_addr,
        }
    }

    pub fn ipt(&self) -> String {
        match self {
            Endpoint::Host(h) => h.ipt(),
            Endpoint::Network(n) => n.ipt(),
        }
    }

    /// Tells if the host interface belongs to this endpoint.
    pub fn contains_host(&self, host: &Host) -> bool {
        match self {
            Endpoint::Host(h) => h.contains(host),
            Endpoint::Network(n) => n.contains_host(host),
        }
    }

    /// Source/destination match for iptables, omitted for the whole address space
    pub fn ipt_match(&self) -> Option<String> {
        if self.ip_addr().is_unspecified() {
            None
        } else {
            Some(self.ipt())
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Host(h) => write!(f, "{}", h.key()),
            Endpoint::Network(n) => write!(f, "{}", n.name),
        }
    }
}
