//! SOCKS5 client dialer.
//!
//! Implements the CONNECT command of RFC 1928 with the optional
//! username/password sub-negotiation of RFC 1929.
//!
//! # Handshake
//!
//! ```text
//! client                                  server
//!   | VER NMETHODS METHODS                   |
//!   |--------------------------------------->|
//!   |                          VER METHOD    |
//!   |<---------------------------------------|
//!   | (0x02) VER ULEN UNAME PLEN PASSWD      |
//!   |--------------------------------------->|
//!   |                          VER STATUS    |
//!   |<---------------------------------------|
//!   | VER CMD RSV ATYP DST.ADDR DST.PORT     |
//!   |--------------------------------------->|
//!   |   VER REP RSV ATYP BND.ADDR BND.PORT   |
//!   |<---------------------------------------|
//! ```

use crate::conn::{Conn, Connection};
use crate::dialer::{split_host_port, BoxDialer, Credentials, Dialer, Network};
use crate::error::{DialError, Result};
use std::fmt;
use std::io::{Read, Write};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const VERSION: u8 = 0x05;
const AUTH_VERSION: u8 = 0x01;
const CMD_CONNECT: u8 = 0x01;

/// Authentication methods.
mod method {
    pub const NO_AUTH: u8 = 0x00;
    pub const USER_PASS: u8 = 0x02;
    pub const NO_ACCEPTABLE: u8 = 0xFF;
}

/// Address types.
mod atyp {
    pub const IPV4: u8 = 0x01;
    pub const DOMAIN: u8 = 0x03;
    pub const IPV6: u8 = 0x04;
}

/// SOCKS5 reply codes.
pub mod reply {
    pub const SUCCEEDED: u8 = 0x00;
    pub const GENERAL_FAILURE: u8 = 0x01;
    pub const CONNECTION_NOT_ALLOWED: u8 = 0x02;
    pub const NETWORK_UNREACHABLE: u8 = 0x03;
    pub const HOST_UNREACHABLE: u8 = 0x04;
    pub const CONNECTION_REFUSED: u8 = 0x05;
    pub const TTL_EXPIRED: u8 = 0x06;
    pub const COMMAND_NOT_SUPPORTED: u8 = 0x07;
    pub const ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

    /// Human-readable text for a reply code.
    pub fn describe(code: u8) -> &'static str {
        match code {
            SUCCEEDED => "succeeded",
            GENERAL_FAILURE => "general SOCKS server failure",
            CONNECTION_NOT_ALLOWED => "connection not allowed by ruleset",
            NETWORK_UNREACHABLE => "network unreachable",
            HOST_UNREACHABLE => "host unreachable",
            CONNECTION_REFUSED => "connection refused",
            TTL_EXPIRED => "TTL expired",
            COMMAND_NOT_SUPPORTED => "command not supported",
            ADDRESS_TYPE_NOT_SUPPORTED => "address type not supported",
            _ => "unknown reply code",
        }
    }
}

/// Dials targets through a SOCKS5 proxy.
pub struct Socks5Dialer {
    network: Network,
    addr: String,
    credentials: Option<Credentials>,
    forward: BoxDialer,
    timeout: Duration,
}

impl Socks5Dialer {
    /// Creates a SOCKS5 dialer for the proxy at `addr`.
    pub fn new(
        network: Network,
        addr: impl Into<String>,
        credentials: Option<Credentials>,
        forward: BoxDialer,
        timeout: Duration,
    ) -> Self {
        Self {
            network,
            addr: addr.into(),
            credentials,
            forward,
            timeout,
        }
    }

    /// The proxy address.
    pub fn proxy_addr(&self) -> &str {
        &self.addr
    }

    /// The handshake deadline budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn handshake(&self, conn: &mut Conn, target: &str) -> Result<()> {
        let credentials = self.credentials.as_ref().filter(|c| !c.user.is_empty());

        let greeting: &[u8] = if credentials.is_some() {
            &[VERSION, 2, method::NO_AUTH, method::USER_PASS]
        } else {
            &[VERSION, 1, method::NO_AUTH]
        };
        conn.write_all(greeting)?;

        let mut choice = [0u8; 2];
        conn.read_exact(&mut choice)?;
        if choice[0] != VERSION {
            return Err(DialError::socks5(format!(
                "unexpected protocol version {}",
                choice[0]
            )));
        }

        match (choice[1], credentials) {
            (method::NO_AUTH, _) => {}
            (method::USER_PASS, Some(creds)) => authenticate(conn, creds)?,
            (method::NO_ACCEPTABLE, _) => {
                return Err(DialError::socks5("no acceptable authentication methods"))
            }
            (other, _) => {
                return Err(DialError::socks5(format!(
                    "server chose unsupported authentication method {}",
                    other
                )))
            }
        }

        conn.write_all(&connect_request(target)?)?;
        read_reply(conn)
    }
}

impl fmt::Debug for Socks5Dialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socks5Dialer")
            .field("network", &self.network)
            .field("addr", &self.addr)
            .field("credentials", &self.credentials)
            .field("forward", &self.forward)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Dialer for Socks5Dialer {
    fn dial(&self, network: Network, addr: &str) -> Result<Conn> {
        let mut conn = self.forward.dial(self.network, &self.addr)?;

        if let Err(source) = conn.set_deadline(Some(Instant::now() + self.timeout)) {
            let _ = conn.shutdown();
            return Err(DialError::Deadline { source });
        }

        if let Err(e) = self.handshake(&mut conn, addr) {
            debug!(proxy = %self.addr, target = %addr, error = %e, "SOCKS5 handshake failed");
            let _ = conn.shutdown();
            return Err(e);
        }

        conn.set_deadline(None)
            .map_err(|source| DialError::Deadline { source })?;

        debug!(
            proxy = %self.addr,
            network = %network,
            target = %addr,
            "SOCKS5 tunnel established"
        );
        Ok(conn)
    }
}

fn authenticate(conn: &mut Conn, creds: &Credentials) -> Result<()> {
    let user = creds.user.as_bytes();
    let password = creds.password.as_deref().unwrap_or("").as_bytes();
    if user.len() > 255 || password.len() > 255 {
        return Err(DialError::socks5("username or password longer than 255 bytes"));
    }

    let mut request = Vec::with_capacity(3 + user.len() + password.len());
    request.push(AUTH_VERSION);
    request.push(user.len() as u8);
    request.extend_from_slice(user);
    request.push(password.len() as u8);
    request.extend_from_slice(password);
    conn.write_all(&request)?;

    let mut status = [0u8; 2];
    conn.read_exact(&mut status)?;
    if status[1] != 0x00 {
        return Err(DialError::socks5("username/password authentication failed"));
    }
    trace!("SOCKS5 authentication accepted");
    Ok(())
}

/// Builds `VER CMD RSV ATYP DST.ADDR DST.PORT` for `target`.
fn connect_request(target: &str) -> Result<Vec<u8>> {
    let (host, port) = split_host_port(target)?;
    let port: u16 = port.parse().map_err(|_| DialError::InvalidAddress {
        addr: target.to_string(),
    })?;

    let mut request = vec![VERSION, CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(atyp::IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(atyp::IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            if host.is_empty() || host.len() > 255 {
                return Err(DialError::InvalidAddress {
                    addr: target.to_string(),
                });
            }
            request.push(atyp::DOMAIN);
            request.push(host.len() as u8);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    Ok(request)
}

/// Reads the server reply and discards the bound address.
fn read_reply(conn: &mut Conn) -> Result<()> {
    let mut header = [0u8; 4];
    conn.read_exact(&mut header)?;
    if header[0] != VERSION {
        return Err(DialError::socks5(format!(
            "unexpected protocol version {}",
            header[0]
        )));
    }
    if header[1] != reply::SUCCEEDED {
        return Err(DialError::socks5(format!(
            "connect failed: {} (0x{:02x})",
            reply::describe(header[1]),
            header[1]
        )));
    }

    let addr_len = match header[3] {
        atyp::IPV4 => 4,
        atyp::IPV6 => 16,
        atyp::DOMAIN => {
            let mut len = [0u8; 1];
            conn.read_exact(&mut len)?;
            len[0] as usize
        }
        other => {
            return Err(DialError::socks5(format!(
                "unknown address type {} in reply",
                other
            )))
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    conn.read_exact(&mut bound)?;
    Ok(())
}
