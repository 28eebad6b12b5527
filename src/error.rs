//! Error types for dialing through proxy chains.
//!
//! Dial and handshake failures are returned to the caller unmodified.
//! Environment-level problems never show up here; the resolver absorbs
//! them and reports [`crate::resolver::EnvWarning`]s instead.

use crate::conn::Conn;
use std::io;
use thiserror::Error;

/// Main error type for dial operations.
#[derive(Error, Debug)]
pub enum DialError {
    /// The connection to the next hop could not be established.
    #[error("dial {network} {addr}: {source}")]
    Dial {
        network: String,
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A deadline could not be applied to a fresh connection.
    ///
    /// The connection has already been closed when this is returned.
    #[error("failed to set connection deadline: {source}")]
    Deadline {
        #[source]
        source: io::Error,
    },

    /// The proxy's reply to CONNECT was not valid HTTP.
    #[error("invalid proxy response: {message}")]
    ResponseParse {
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    /// The proxy answered CONNECT with a non-200 status.
    ///
    /// The connection is still open; take it with
    /// [`DialError::into_connection`] or drop the error to close it.
    #[error("unable to proxy connection: {status}")]
    TunnelRejected { status: String, connection: Conn },

    /// No built-in or registered factory handles this URL scheme.
    #[error("proxy: unknown scheme: {scheme}")]
    UnknownScheme { scheme: String },

    /// A proxy URL is missing a part the factory needs.
    #[error("invalid proxy url {url}: {reason}")]
    InvalidProxyUrl { url: String, reason: String },

    /// The SOCKS5 server refused or garbled the handshake.
    #[error("socks5: {message}")]
    Socks5 { message: String },

    /// An address could not be split into host and port.
    #[error("invalid address: {addr}")]
    InvalidAddress { addr: String },

    /// The dialer does not support the requested network kind.
    #[error("unsupported network: {network}")]
    UnsupportedNetwork { network: String },

    /// A proxy setting holds a value that cannot be used.
    #[error("invalid setting {name}={value:?}: {reason}")]
    InvalidSetting {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// I/O error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DialError {
    /// Creates a new response parse error without an underlying I/O cause.
    pub fn response_parse(message: impl Into<String>) -> Self {
        Self::ResponseParse {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new SOCKS5 protocol error.
    pub fn socks5(message: impl Into<String>) -> Self {
        Self::Socks5 {
            message: message.into(),
        }
    }

    /// Creates a new invalid proxy URL error.
    pub fn invalid_proxy_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProxyUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the proxy refused the tunnel.
    pub fn is_tunnel_rejected(&self) -> bool {
        matches!(self, Self::TunnelRejected { .. })
    }

    /// Takes the still-open connection out of a rejected tunnel.
    pub fn into_connection(self) -> Option<Conn> {
        match self {
            Self::TunnelRejected { connection, .. } => Some(connection),
            _ => None,
        }
    }
}

/// Result type alias using DialError.
pub type Result<T> = std::result::Result<T, DialError>;
