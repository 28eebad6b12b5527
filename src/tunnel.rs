//! HTTP/HTTPS CONNECT tunnel dialer.
//!
//! [`HttpTunnel`] reaches a proxy through its forward dialer, asks it to
//! `CONNECT` to the target, and hands back a connection that behaves like
//! a direct socket to the target.
//!
//! # Handshake
//!
//! ```text
//! forward.dial(proxy)          --> raw connection
//! set deadline / read / write  --> one shared absolute deadline
//! CONNECT target HTTP/1.1      --> Host: target
//! read status line + headers   --> buffered reader
//!         |
//!         +-- 200      --> ReadAheadConn(buffered bytes, raw connection)
//!         +-- non-200  --> TunnelRejected (connection returned open)
//! ```
//!
//! A proxy may send tunnel data in the same segment as its response
//! headers. Those bytes end up in the parser's buffer and are replayed by
//! [`ReadAheadConn`] before any further read hits the socket.

use crate::conn::{Conn, Connection, ReadAheadConn};
use crate::dialer::{BoxDialer, Credentials, Dialer, Network};
use crate::error::{DialError, Result};
use bytes::Bytes;
use http::{Method, StatusCode};
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Capacity of the reader that parses the proxy's response.
const RESPONSE_BUFFER_SIZE: usize = 4096;

/// Upper bound on the status line plus headers of a CONNECT response.
const MAX_RESPONSE_HEAD: usize = 64 * 1024;

/// Dials targets through an HTTP proxy using `CONNECT`.
///
/// Configuration is fixed at construction, so one instance can serve
/// concurrent dials as long as its forward dialer can.
pub struct HttpTunnel {
    network: Network,
    addr: String,
    credentials: Option<Credentials>,
    forward: BoxDialer,
    timeout: Duration,
}

impl HttpTunnel {
    /// Creates a tunnel dialer for the proxy at `addr`.
    ///
    /// # Arguments
    /// * `network` - Network used to reach the proxy
    /// * `addr` - Proxy address (`host:port`)
    /// * `credentials` - Optional proxy user and password
    /// * `forward` - Dialer used to reach the proxy
    /// * `timeout` - Deadline budget applied to the proxy connection
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

    /// The configured credentials, if any.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// The deadline budget applied to each dial.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Address handed to the forward dialer.
    ///
    /// Credentials are embedded as `user[:password]@addr`; no
    /// `Proxy-Authorization` header is ever sent. What happens with them
    /// is up to the forward dialer.
    pub fn dial_addr(&self) -> String {
        match &self.credentials {
            Some(creds) if !creds.user.is_empty() => match creds.password.as_deref() {
                Some(password) if !password.is_empty() => {
                    format!("{}:{}@{}", creds.user, password, self.addr)
                }
                _ => format!("{}@{}", creds.user, self.addr),
            },
            _ => self.addr.clone(),
        }
    }

    /// Runs the CONNECT exchange on an already established connection.
    fn connect(&self, mut conn: Conn, target: &str) -> Result<Conn> {
        let request = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\n\r\n",
            Method::CONNECT,
            target,
            target
        );
        conn.write_all(request.as_bytes())?;
        conn.flush()?;
        trace!(target = %target, "Sent CONNECT request");

        let mut reader = BufReader::with_capacity(RESPONSE_BUFFER_SIZE, conn);
        let head = read_response_head(&mut reader)?;

        // Whatever the parser pulled past the header block belongs to
        // the tunnel.
        let prefix = Bytes::copy_from_slice(reader.buffer());
        let conn: Conn = Box::new(ReadAheadConn::new(prefix, reader.into_inner()));

        if head.code != StatusCode::OK {
            warn!(
                proxy = %self.addr,
                target = %target,
                status = %head.status,
                "Proxy rejected CONNECT"
            );
            return Err(DialError::TunnelRejected {
                status: head.status,
                connection: conn,
            });
        }

        debug!(proxy = %self.addr, target = %target, "Tunnel established");
        Ok(conn)
    }
}

impl fmt::Debug for HttpTunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTunnel")
            .field("network", &self.network)
            .field("addr", &self.addr)
            .field("credentials", &self.credentials)
            .field("forward", &self.forward)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Dialer for HttpTunnel {
    fn dial(&self, _network: Network, addr: &str) -> Result<Conn> {
        let conn = self.forward.dial(self.network, &self.dial_addr())?;

        let deadline = Instant::now() + self.timeout;
        let applied = conn
            .set_deadline(Some(deadline))
            .and_then(|_| conn.set_read_deadline(Some(deadline)))
            .and_then(|_| conn.set_write_deadline(Some(deadline)));
        if let Err(source) = applied {
            // Best-effort close; the connection is dropped either way.
            let _ = conn.shutdown();
            return Err(DialError::Deadline { source });
        }

        self.connect(conn, addr)
    }
}

/// Status of a parsed CONNECT response.
#[derive(Debug)]
struct ResponseHead {
    code: StatusCode,
    /// Literal status text, e.g. `407 Proxy Authentication Required`.
    status: String,
}

/// Reads the status line and headers, leaving any further bytes buffered.
fn read_response_head<R: Read>(reader: &mut BufReader<R>) -> Result<ResponseHead> {
    let mut consumed = 0usize;

    let status_line = read_head_line(reader, &mut consumed)?;
    let head = parse_status_line(&status_line)?;

    loop {
        let line = read_head_line(reader, &mut consumed)?;
        if line.is_empty() {
            break;
        }
        if !line.contains(':') {
            return Err(DialError::response_parse(format!(
                "malformed header line: {:?}",
                line
            )));
        }
    }

    Ok(head)
}

/// Reads one CRLF (or LF) terminated line without its terminator.
fn read_head_line<R: Read>(reader: &mut BufReader<R>, consumed: &mut usize) -> Result<String> {
    let mut line = Vec::new();
    let budget = (MAX_RESPONSE_HEAD - *consumed) as u64;
    let n = reader
        .by_ref()
        .take(budget)
        .read_until(b'\n', &mut line)
        .map_err(|e| DialError::ResponseParse {
            message: "failed to read proxy response".to_string(),
            source: Some(e),
        })?;
    *consumed += n;

    if !line.ends_with(b"\n") {
        let message = if *consumed >= MAX_RESPONSE_HEAD {
            "proxy response head too large"
        } else {
            "unexpected EOF in proxy response"
        };
        return Err(DialError::ResponseParse {
            message: message.to_string(),
            source: Some(io::ErrorKind::UnexpectedEof.into()),
        });
    }

    line.pop();
    if line.ends_with(b"\r") {
        line.pop();
    }
    // Reason phrases may carry obs-text; only the structure must be ASCII.
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// Parses `HTTP/1.x <code> <reason>`.
fn parse_status_line(line: &str) -> Result<ResponseHead> {
    let malformed = || DialError::response_parse(format!("malformed status line: {:?}", line));

    let (version, rest) = line.split_once(' ').ok_or_else(malformed)?;
    if !version.starts_with("HTTP/") {
        return Err(malformed());
    }

    let rest = rest.trim_start();
    let code = rest.split_once(' ').map_or(rest, |(code, _)| code);
    if code.len() != 3 {
        return Err(malformed());
    }
    let code = StatusCode::from_bytes(code.as_bytes()).map_err(|_| malformed())?;

    let status = rest.trim_end().to_string();

    Ok(ResponseHead { code, status })
}
