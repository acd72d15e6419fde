use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::{Error, Result};

pub(crate) const VER: u8 = 5;
pub(crate) const AUTH_VER: u8 = 1;

pub(crate) const ATYP_IPV4: u8 = 1;
pub(crate) const ATYP_DOMAIN: u8 = 3;
pub(crate) const ATYP_IPV6: u8 = 4;

pub(crate) const AUTH_SUCCESS: u8 = 0x00;
pub(crate) const AUTH_FAILURE: u8 = 0xFF;

/// Authentication method byte, as announced by the client or selected by
/// the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Method(pub u8);

impl Method {
    pub const NO_AUTH: Method = Method(0x00);
    pub const USERNAME_PASSWORD: Method = Method(0x02);
    pub const NO_ACCEPTABLE: Method = Method(0xFF);
}

/// Command byte of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Command(pub u8);

impl Command {
    pub const CONNECT: Command = Command(0x01);
    pub const BIND: Command = Command(0x02);
    pub const UDP_ASSOCIATE: Command = Command(0x03);
}

/// Reply field of a connect reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Reply(pub u8);

const REPLY_STRINGS: [&str; 9] = [
    "succeeded",
    "general SOCKS server failure",
    "connection not allowed by ruleset",
    "network unreachable",
    "host unreachable",
    "connection refused",
    "TTL expired",
    "command not supported",
    "address type not supported",
];

impl Reply {
    pub const SUCCEEDED: Reply = Reply(0x00);
    pub const GENERAL_FAILURE: Reply = Reply(0x01);
    pub const CONNECTION_NOT_ALLOWED: Reply = Reply(0x02);
    pub const NETWORK_UNREACHABLE: Reply = Reply(0x03);
    pub const HOST_UNREACHABLE: Reply = Reply(0x04);
    pub const CONNECTION_REFUSED: Reply = Reply(0x05);
    pub const TTL_EXPIRED: Reply = Reply(0x06);
    pub const COMMAND_NOT_SUPPORTED: Reply = Reply(0x07);
    pub const ADDRTYPE_NOT_SUPPORTED: Reply = Reply(0x08);

    /// Human readable meaning of a code defined by RFC 1928.
    pub fn description(self) -> Option<&'static str> {
        REPLY_STRINGS.get(self.0 as usize).copied()
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description() {
            Some(s) => f.write_str(s),
            None => write!(f, "unknown code= {}", self.0),
        }
    }
}

/// A domain name, at most 255 bytes so that it fits the one byte length
/// prefix on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Hostname(String);

impl TryFrom<String> for Hostname {
    type Error = Error;

    fn try_from(s: String) -> Result<Hostname> {
        if s.is_empty() || s.len() > 255 {
            Err(Error::InvalidRequest(format!(
                "domain name must be 1 to 255 bytes, got {}",
                s.len()
            )))
        } else {
            Ok(Hostname(s))
        }
    }
}

impl AsRef<str> for Hostname {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<Hostname> for String {
    fn from(h: Hostname) -> String {
        h.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(Hostname),
}

impl Address {
    /// `0.0.0.0`, used as bind address placeholder in replies.
    pub fn unspecified() -> Self {
        Address::Ipv4(Ipv4Addr::UNSPECIFIED)
    }

    pub(crate) fn atyp(&self) -> u8 {
        match self {
            Address::Ipv4(_) => ATYP_IPV4,
            Address::Ipv6(_) => ATYP_IPV6,
            Address::Domain(_) => ATYP_DOMAIN,
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Classify by literal syntax: IPv4, then IPv6, then domain name.
    fn from_str(s: &str) -> Result<Address> {
        if let Ok(ip) = s.parse::<Ipv4Addr>() {
            Ok(Address::Ipv4(ip))
        } else if let Ok(ip) = s.parse::<Ipv6Addr>() {
            Ok(Address::Ipv6(ip))
        } else {
            Ok(Address::Domain(Hostname::try_from(s.to_string())?))
        }
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(ip) => Address::Ipv4(ip),
            IpAddr::V6(ip) => Address::Ipv6(ip),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip) => write!(f, "{}", ip),
            Address::Ipv6(ip) => write!(f, "{}", ip),
            Address::Domain(h) => f.write_str(&h.0),
        }
    }
}

/// Username/password pair for RFC 1929 authentication.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub(crate) username: String,
    pub(crate) password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let username = username.into();
        let password = password.into();
        check_credential(&username)?;
        check_credential(&password)?;
        Ok(Self { username, password })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub(crate) fn check_credential(s: &str) -> Result<()> {
    if s.is_empty() || s.len() > 255 {
        Err(Error::InvalidCredentials)
    } else {
        Ok(())
    }
}

/// A client's connect request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectRequest {
    pub command: Command,
    pub address: Address,
    pub port: u16,
}

/// A server's reply to a connect request. `bind` is only present on
/// success.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectReply {
    pub reply: Reply,
    pub bind: Option<(Address, u16)>,
}

/// Outcome of running a parser over buffered bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Parse<T> {
    /// A complete message, and the number of bytes it occupied.
    Done(T, usize),
    /// The bytes are a valid but incomplete prefix of a message.
    NeedMore,
}
