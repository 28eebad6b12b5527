//! Live connections returned by dialers.
//!
//! [`Connection`] is the byte stream every [`crate::Dialer`] hands back.
//! [`ReadAheadConn`] decorates one with bytes a protocol parser already
//! pulled off the wire, so callers see the stream without gaps.

use bytes::{Buf, Bytes};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A boxed, owned connection.
pub type Conn = Box<dyn Connection>;

/// A bidirectional byte stream with absolute deadlines.
///
/// Deadlines are absolute instants. `None` clears the deadline. Once a
/// deadline passes, blocked and future reads or writes fail with a
/// timeout error.
pub trait Connection: Read + Write + Send + Sync + fmt::Debug {
    /// Sets the deadline for future reads.
    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;

    /// Sets the deadline for future writes.
    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;

    /// Sets both the read and write deadline.
    fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.set_read_deadline(deadline)?;
        self.set_write_deadline(deadline)
    }

    /// Closes both directions of the connection.
    fn shutdown(&self) -> io::Result<()>;
}

/// Time left until `deadline`, for use as a socket timeout.
///
/// `Ok(None)` means no deadline. A deadline that has already passed is a
/// `TimedOut` error, so callers never block past it.
pub(crate) fn remaining(deadline: Option<Instant>) -> io::Result<Option<Duration>> {
    match deadline {
        None => Ok(None),
        Some(at) => match at.checked_duration_since(Instant::now()) {
            Some(left) if !left.is_zero() => Ok(Some(left)),
            _ => Err(deadline_exceeded()),
        },
    }
}

fn deadline_exceeded() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded")
}

/// A TCP stream with absolute read and write deadlines.
///
/// std sockets only know relative timeouts, which restart on every call.
/// The socket timeout is re-armed from the time left before each read or
/// write, so a peer trickling bytes cannot stretch a deadline.
#[derive(Debug)]
pub struct TcpConn {
    stream: TcpStream,
    read_deadline: Mutex<Option<Instant>>,
    write_deadline: Mutex<Option<Instant>>,
}

impl TcpConn {
    /// Wraps a connected stream with no deadlines set.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_deadline: Mutex::new(None),
            write_deadline: Mutex::new(None),
        }
    }

    /// The underlying stream.
    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }

    /// Unwraps the stream. Socket timeouts left over from the last call
    /// stay in effect.
    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

fn load(slot: &Mutex<Option<Instant>>) -> Option<Instant> {
    *slot.lock().unwrap_or_else(|e| e.into_inner())
}

fn store(slot: &Mutex<Option<Instant>>, deadline: Option<Instant>) {
    *slot.lock().unwrap_or_else(|e| e.into_inner()) = deadline;
}

/// Socket timeouts surface as `WouldBlock` on Unix; report them uniformly.
fn timed_out(e: io::Error, armed: bool) -> io::Error {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut if armed => deadline_exceeded(),
        _ => e,
    }
}

impl Read for TcpConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = remaining(load(&self.read_deadline))?;
        self.stream.set_read_timeout(timeout)?;
        self.stream.read(buf).map_err(|e| timed_out(e, timeout.is_some()))
    }
}

impl Write for TcpConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let timeout = remaining(load(&self.write_deadline))?;
        self.stream.set_write_timeout(timeout)?;
        self.stream.write(buf).map_err(|e| timed_out(e, timeout.is_some()))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Connection for TcpConn {
    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        store(&self.read_deadline, deadline);
        Ok(())
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        store(&self.write_deadline, deadline);
        Ok(())
    }

    fn shutdown(&self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        (**self).set_read_deadline(deadline)
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        (**self).set_write_deadline(deadline)
    }

    fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        (**self).set_deadline(deadline)
    }

    fn shutdown(&self) -> io::Result<()> {
        (**self).shutdown()
    }
}

/// A connection whose first bytes were already read by a parser.
///
/// Reads drain the buffered prefix first and then go to the wrapped
/// connection. Everything else is forwarded untouched.
pub struct ReadAheadConn {
    prefix: Bytes,
    inner: Conn,
}

impl ReadAheadConn {
    /// Wraps `inner`, serving `prefix` before any byte from the wire.
    pub fn new(prefix: Bytes, inner: Conn) -> Self {
        Self { prefix, inner }
    }

    /// Number of prefix bytes not yet handed out.
    pub fn buffered(&self) -> usize {
        self.prefix.len()
    }

    /// Splits the adapter into the undrained prefix and the raw connection.
    pub fn into_parts(self) -> (Bytes, Conn) {
        (self.prefix, self.inner)
    }
}

impl fmt::Debug for ReadAheadConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadAheadConn")
            .field("buffered", &self.prefix.len())
            .field("inner", &self.inner)
            .finish()
    }
}

impl Read for ReadAheadConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.prefix.has_remaining() {
            let n = buf.len().min(self.prefix.len());
            buf[..n].copy_from_slice(&self.prefix[..n]);
            self.prefix.advance(n);
            return Ok(n);
        }
        self.inner.read(buf)
    }
}

impl Write for ReadAheadConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Connection for ReadAheadConn {
    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.inner.set_read_deadline(deadline)
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.inner.set_write_deadline(deadline)
    }

    fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.inner.set_deadline(deadline)
    }

    fn shutdown(&self) -> io::Result<()> {
        self.inner.shutdown()
    }
}
