//! Direction-exclusive handles over one TCP connection.
//!
//! [`split`] hands out three handles backed by clones of the same socket:
//! the receive loop gets the only [`ConnReader`], the send loop gets the only
//! [`ConnWriter`], and the session keeps a [`ShutdownHandle`] so `stop()` can
//! unblock both loops without touching their data paths.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use tracing::{debug, warn};

const SOCKET_BUF_SIZE: usize = 1024 * 1024;

/// Read half. Implements [`Read`] only.
#[derive(Debug)]
pub struct ConnReader(TcpStream);

/// Write half. Implements [`Write`] only.
#[derive(Debug)]
pub struct ConnWriter(TcpStream);

/// Closes the connection in both directions.
#[derive(Debug)]
pub struct ShutdownHandle(TcpStream);

/// Apply socket options and split `stream` into its three handles.
///
/// `io_timeout` bounds every blocking read and write; an expired timeout
/// surfaces as `WouldBlock`/`TimedOut` and is classified by the framing layer.
pub fn split(
    stream: TcpStream,
    io_timeout: Duration,
) -> io::Result<(ConnReader, ConnWriter, ShutdownHandle)> {
    configure(&stream, io_timeout)?;
    let reader = stream.try_clone()?;
    let shutdown = stream.try_clone()?;
    Ok((ConnReader(reader), ConnWriter(stream), ShutdownHandle(shutdown)))
}

fn configure(stream: &TcpStream, io_timeout: Duration) -> io::Result<()> {
    let timeout = (!io_timeout.is_zero()).then_some(io_timeout);
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;

    // Throughput options are best effort; the transfer works without them.
    let sock_ref = socket2::SockRef::from(stream);
    if let Err(e) = sock_ref.set_nodelay(true) {
        warn!("failed to set TCP_NODELAY: {}", e);
    }
    if let Err(e) = sock_ref.set_send_buffer_size(SOCKET_BUF_SIZE) {
        warn!("failed to set send buffer size: {}", e);
    }
    if let Err(e) = sock_ref.set_recv_buffer_size(SOCKET_BUF_SIZE) {
        warn!("failed to set recv buffer size: {}", e);
    }

    debug!(peer = ?stream.peer_addr().ok(), timeout_secs = io_timeout.as_secs(), "connection configured");
    Ok(())
}

impl Read for ConnReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for ConnWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl ShutdownHandle {
    /// Shut down both directions. Blocked reads return 0 and blocked writes
    /// fail. Errors (already closed, peer gone) are ignored.
    pub fn shutdown(&self) {
        let _ = self.0.shutdown(Shutdown::Both);
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.0.peer_addr().ok()
    }
}
