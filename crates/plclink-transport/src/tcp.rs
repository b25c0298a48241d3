use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::LinkStream;

/// Default time allowed for an outgoing TCP connection to complete.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Options applied to outgoing TCP connections.
#[derive(Debug, Clone)]
pub struct TcpOptions {
    /// Connection timeout. Default: 5 s.
    pub connect_timeout: Duration,
    /// Disable Nagle's algorithm. Frames are small and latency matters. Default: true.
    pub nodelay: bool,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            nodelay: true,
        }
    }
}

/// TCP transport.
///
/// `connect` is the panel side; `bind`/`accept` serve the device simulator
/// and loopback tests.
pub struct TcpLink {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpLink {
    /// Bind and listen on `addr` (e.g. `"127.0.0.1:8080"`, or port 0 for any).
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        let local_addr = listener.local_addr()?;

        info!(%local_addr, "listening on tcp");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<LinkStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted tcp connection");
        Ok(LinkStream::from_tcp(stream))
    }

    /// Connect to a device with default options.
    pub fn connect(addr: &str) -> Result<LinkStream> {
        Self::connect_with_options(addr, &TcpOptions::default())
    }

    /// Connect to a device, trying each resolved address until one succeeds.
    pub fn connect_with_options(addr: &str, options: &TcpOptions) -> Result<LinkStream> {
        let candidates: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|e| TransportError::Connect {
                addr: addr.to_string(),
                source: e,
            })?
            .collect();
        if candidates.is_empty() {
            return Err(TransportError::Unresolved(addr.to_string()));
        }

        let mut last_err = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, options.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(options.nodelay)?;
                    debug!(%candidate, nodelay = options.nodelay, "connected over tcp");
                    return Ok(LinkStream::from_tcp(stream));
                }
                Err(err) => {
                    debug!(%candidate, error = %err, "tcp connect attempt failed");
                    last_err = Some(err);
                }
            }
        }

        Err(TransportError::Connect {
            addr: addr.to_string(),
            source: last_err
                .unwrap_or_else(|| std::io::Error::from(std::io::ErrorKind::AddrNotAvailable)),
        })
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_bind_accept_connect() {
        let listener = TcpLink::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().to_string();

        let handle = std::thread::spawn(move || {
            let mut client = TcpLink::connect(&addr).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert!(!server.is_datagram());

        handle.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        let port = {
            let probe = TcpLink::bind("127.0.0.1:0").unwrap();
            probe.local_addr().port()
        };
        let result = TcpLink::connect(&format!("127.0.0.1:{port}"));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn test_bind_in_use() {
        let first = TcpLink::bind("127.0.0.1:0").unwrap();
        let addr = first.local_addr().to_string();
        let second = TcpLink::bind(&addr);
        assert!(matches!(second, Err(TransportError::Bind { .. })));
    }

    #[test]
    fn test_shutdown_unblocks_reader() {
        let listener = TcpLink::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().to_string();
        let client = TcpLink::connect(&addr).unwrap();
        let _server = listener.accept().unwrap();

        let mut reader = client.try_clone().unwrap();
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf).unwrap()
        });

        std::thread::sleep(Duration::from_millis(20));
        client.shutdown().unwrap();
        assert_eq!(handle.join().unwrap(), 0);
    }
}
