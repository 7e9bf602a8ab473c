//! Transport seam between the client engine and its byte stream.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream as StdTcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};

pub use mio::Waker;

const CLIENT: Token = Token(0);
const WAKE: Token = Token(1);

/// A non-blocking byte stream the client drives.
///
/// `send` and `recv` never park: they return `WouldBlock` when the
/// stream is not ready, and `wait` parks until readiness or timeout.
/// TLS or proxied streams live behind this trait in embedding code.
pub trait Transport: Send {
    /// Write from `buf`, returning how many bytes were accepted.
    /// Partial writes are normal.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Read into `buf`. `Ok(0)` means the peer closed the stream.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Park until the stream is readable or writable, or `timeout`
    /// elapses. `None` waits indefinitely. Spurious wakeups are fine.
    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Close the stream. Further calls fail.
    fn close(&mut self) -> io::Result<()>;

    /// Handle that interrupts a concurrent [`wait`](Transport::wait)
    /// from another thread. Implementations without one return `None`;
    /// their callers must keep wait timeouts finite.
    fn waker(&self) -> Option<Arc<Waker>> {
        None
    }
}

/// TCP transport backed by a mio poll.
pub struct TcpTransport {
    poll: Poll,
    events: Events,
    stream: TcpStream,
    waker: Arc<Waker>,
}

impl TcpTransport {
    /// Connect to `addr` within `timeout`, switch the socket to
    /// non-blocking, and register it for readiness events.
    pub fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> io::Result<Self> {
        // Resolve address
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "Could not resolve address")
        })?;

        // Create non-blocking TCP connection
        let std_stream = StdTcpStream::connect_timeout(&addr, timeout)?;
        std_stream.set_nonblocking(true)?;
        std_stream.set_nodelay(true)?;

        let mut stream = TcpStream::from_std(std_stream);

        // Register with poll
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE)?);
        poll.registry()
            .register(&mut stream, CLIENT, Interest::READABLE | Interest::WRITABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(16),
            stream,
            waker,
        })
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => Ok(()),
            // Treat an interrupted wait as a spurious wakeup.
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        let _ = self.poll.registry().deregister(&mut self.stream);
        self.stream.shutdown(Shutdown::Both)
    }

    fn waker(&self) -> Option<Arc<Waker>> {
        Some(self.waker.clone())
    }
}
