use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::trace;

use crate::error::{Result, TransportError};

/// A connected device link. Implements Read + Write.
///
/// This is the I/O type every transport operation returns. A TCP link is a
/// byte stream with arbitrary chunking; a UDP link delivers exactly one
/// datagram per `read` and sends each `write` as one datagram.
pub struct LinkStream {
    inner: LinkStreamInner,
}

enum LinkStreamInner {
    Tcp(TcpStream),
    Udp(DatagramLink),
}

struct DatagramLink {
    socket: UdpSocket,
    peer: Arc<Mutex<Option<SocketAddr>>>,
    /// Reply to whoever sent the last datagram instead of a fixed target.
    follow_sender: bool,
    closed: Arc<AtomicBool>,
}

impl DatagramLink {
    fn peer(&self) -> Option<SocketAddr> {
        match self.peer.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn remember_peer(&self, addr: SocketAddr) {
        match self.peer.lock() {
            Ok(mut guard) => *guard = Some(addr),
            Err(poisoned) => *poisoned.into_inner() = Some(addr),
        }
    }
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.read(buf),
            LinkStreamInner::Udp(link) => {
                // An empty datagram is a valid read of zero bytes, so a
                // local shutdown has to be reported as an error instead.
                if link.closed.load(Ordering::SeqCst) {
                    return Err(TransportError::Shutdown.into_io());
                }
                let (n, from) = link.socket.recv_from(buf)?;
                trace!(%from, len = n, "datagram received");
                if link.follow_sender {
                    link.remember_peer(from);
                }
                Ok(n)
            }
        }
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.write(buf),
            LinkStreamInner::Udp(link) => {
                if link.closed.load(Ordering::SeqCst) {
                    return Err(TransportError::Shutdown.into_io());
                }
                let peer = link.peer().ok_or_else(|| TransportError::NoPeer.into_io())?;
                link.socket.send_to(buf, peer)
            }
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.flush(),
            LinkStreamInner::Udp(_) => Ok(()),
        }
    }
}

impl LinkStream {
    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: LinkStreamInner::Tcp(stream),
        }
    }

    pub(crate) fn from_udp(
        socket: UdpSocket,
        target: Option<SocketAddr>,
        follow_sender: bool,
    ) -> Self {
        Self {
            inner: LinkStreamInner::Udp(DatagramLink {
                socket,
                peer: Arc::new(Mutex::new(target)),
                follow_sender,
                closed: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// True when each read yields exactly one message (UDP).
    pub fn is_datagram(&self) -> bool {
        matches!(self.inner, LinkStreamInner::Udp(_))
    }

    /// Short transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match self.inner {
            LinkStreamInner::Tcp(_) => "tcp",
            LinkStreamInner::Udp(_) => "udp",
        }
    }

    /// Local address of the underlying socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => stream.local_addr().map_err(Into::into),
            LinkStreamInner::Udp(link) => link.socket.local_addr().map_err(Into::into),
        }
    }

    /// Remote address: the connected TCP peer, or the current datagram target.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => stream.peer_addr().ok(),
            LinkStreamInner::Udp(link) => link.peer(),
        }
    }

    /// Set read timeout on the underlying socket.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            LinkStreamInner::Udp(link) => {
                link.socket.set_read_timeout(timeout).map_err(Into::into)
            }
        }
    }

    /// Set write timeout on the underlying socket.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            LinkStreamInner::Udp(link) => {
                link.socket.set_write_timeout(timeout).map_err(Into::into)
            }
        }
    }

    /// Try to clone this link (creates a new descriptor).
    ///
    /// Datagram clones share the peer address and the closed flag, so a
    /// reply target learned by the reading half is used by the writing half.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => Ok(Self::from_tcp(stream.try_clone()?)),
            LinkStreamInner::Udp(link) => Ok(Self {
                inner: LinkStreamInner::Udp(DatagramLink {
                    socket: link.socket.try_clone()?,
                    peer: Arc::clone(&link.peer),
                    follow_sender: link.follow_sender,
                    closed: Arc::clone(&link.closed),
                }),
            }),
        }
    }

    /// Shut the link down in both directions.
    ///
    /// A blocked TCP read returns EOF. A datagram link is marked closed: the
    /// next read or write fails with `ErrorKind::NotConnected`.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => match stream.shutdown(Shutdown::Both) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(err.into()),
            },
            LinkStreamInner::Udp(link) => {
                link.closed.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStream")
            .field("type", &self.transport_name())
            .field("peer", &self.peer_addr())
            .finish()
    }
}
