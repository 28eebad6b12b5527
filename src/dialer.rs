//! The dialing capability shared by every connector.
//!
//! A [`Dialer`] turns a network kind and an address into a live
//! [`Conn`]. Connectors compose by wrapping: a proxy dialer holds a
//! forward dialer that it uses to reach the proxy itself, and
//! [`Direct`] sits at the bottom of every chain.

use crate::conn::{Conn, TcpConn};
use crate::error::{DialError, Result};
use std::fmt;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, trace};

/// Network kinds a dialer can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Network {
    /// TCP over IPv4 or IPv6.
    #[default]
    Tcp,
    /// TCP over IPv4 only.
    Tcp4,
    /// TCP over IPv6 only.
    Tcp6,
}

impl Network {
    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
        }
    }

    /// Returns true if `addr` belongs to this network's address family.
    pub fn accepts(&self, addr: &SocketAddr) -> bool {
        match self {
            Network::Tcp => true,
            Network::Tcp4 => addr.is_ipv4(),
            Network::Tcp6 => addr.is_ipv6(),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = DialError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            _ => Err(DialError::UnsupportedNetwork {
                network: s.to_string(),
            }),
        }
    }
}

/// Username and optional password for a proxy.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    /// The user name.
    pub user: String,

    /// The password, if one was given.
    pub password: Option<String>,
}

impl Credentials {
    /// Creates credentials with a user and no password.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: None,
        }
    }

    /// Sets the password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A means to establish a connection.
///
/// Implementations block the calling thread until the connection is up
/// or has failed, and must be safe to call from several threads at once.
pub trait Dialer: Send + Sync + fmt::Debug {
    /// Connects to `addr` on the given network.
    fn dial(&self, network: Network, addr: &str) -> Result<Conn>;
}

/// A boxed dialer, owned by whoever wraps it.
pub type BoxDialer = Box<dyn Dialer>;

impl<D: Dialer + ?Sized> Dialer for Box<D> {
    fn dial(&self, network: Network, addr: &str) -> Result<Conn> {
        (**self).dial(network, addr)
    }
}

impl<D: Dialer + ?Sized> Dialer for Arc<D> {
    fn dial(&self, network: Network, addr: &str) -> Result<Conn> {
        (**self).dial(network, addr)
    }
}

/// Connects directly, without any proxy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Direct;

impl Dialer for Direct {
    fn dial(&self, network: Network, addr: &str) -> Result<Conn> {
        let dial_err = |source| DialError::Dial {
            network: network.to_string(),
            addr: addr.to_string(),
            source,
        };

        let candidates: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(dial_err)?
            .filter(|candidate| network.accepts(candidate))
            .collect();

        let mut last_err = None;
        for candidate in candidates {
            trace!(addr = %addr, candidate = %candidate, "Trying direct connection");
            match TcpStream::connect(candidate) {
                Ok(stream) => {
                    debug!(
                        network = %network,
                        addr = %addr,
                        peer = %candidate,
                        "Connected directly"
                    );
                    return Ok(Box::new(TcpConn::new(stream)));
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(dial_err(last_err.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("no {} address found", network),
            )
        })))
    }
}

/// Splits `host:port` into its parts, removing brackets from IPv6 hosts.
pub(crate) fn split_host_port(addr: &str) -> Result<(&str, &str)> {
    let invalid = || DialError::InvalidAddress {
        addr: addr.to_string(),
    };

    if let Some(rest) = addr.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
        let port = after.strip_prefix(':').ok_or_else(invalid)?;
        return Ok((host, port));
    }

    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    if host.contains(':') {
        // Unbracketed IPv6 literal.
        return Err(invalid());
    }
    Ok((host, port))
}
