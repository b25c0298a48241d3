use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::LinkStream;

/// Default local port the panel listens on for device datagrams.
pub const DEFAULT_LISTEN_PORT: u16 = 8081;

/// Default device port datagrams are sent to.
pub const DEFAULT_TARGET_PORT: u16 = 8080;

/// UDP transport.
///
/// UDP has no connection: a link is a bound socket plus the address outgoing
/// frames go to. Frames are datagram-aligned by construction.
pub struct UdpLink;

impl UdpLink {
    /// Bind `listen` and send every frame to `target`.
    ///
    /// Datagrams are accepted from any sender.
    pub fn bind(listen: &str, target: &str) -> Result<LinkStream> {
        let target = resolve(target)?;
        let socket = bind_socket(listen)?;
        debug!(%target, "udp link targets device");
        Ok(LinkStream::from_udp(socket, Some(target), false))
    }

    /// Bind `listen` and reply to whoever sent the most recent datagram.
    ///
    /// Writes fail with `NoPeer` until the first datagram arrives. Used by
    /// the device simulator.
    pub fn bind_responder(listen: &str) -> Result<LinkStream> {
        let socket = bind_socket(listen)?;
        Ok(LinkStream::from_udp(socket, None, true))
    }

    /// Transport name for diagnostics.
    pub fn transport_name() -> &'static str {
        "udp"
    }
}

fn bind_socket(listen: &str) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(listen).map_err(|e| TransportError::Bind {
        addr: listen.to_string(),
        source: e,
    })?;
    let local_addr = socket.local_addr()?;
    info!(%local_addr, "listening on udp");
    Ok(socket)
}

fn resolve(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()
        .map_err(|e| TransportError::Connect {
            addr: addr.to_string(),
            source: e,
        })?
        .next()
        .ok_or_else(|| TransportError::Unresolved(addr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{ErrorKind, Read, Write};
    use std::time::Duration;

    #[test]
    fn test_datagram_roundtrip_with_responder() {
        let mut device = UdpLink::bind_responder("127.0.0.1:0").unwrap();
        let device_addr = device.local_addr().unwrap().to_string();
        let mut panel = UdpLink::bind("127.0.0.1:0", &device_addr).unwrap();
        assert!(panel.is_datagram());

        panel.write_all(b"ping").unwrap();
        let mut buf = [0u8; 64];
        let n = device.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");

        device.write_all(b"pong").unwrap();
        let n = panel.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[test]
    fn test_one_read_per_datagram() {
        let mut device = UdpLink::bind_responder("127.0.0.1:0").unwrap();
        let device_addr = device.local_addr().unwrap().to_string();
        let mut panel = UdpLink::bind("127.0.0.1:0", &device_addr).unwrap();

        panel.write_all(b"first").unwrap();
        panel.write_all(b"second").unwrap();

        let mut buf = [0u8; 64];
        let n = device.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"first");
        let n = device.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"second");
    }

    #[test]
    fn test_responder_without_peer_rejects_write() {
        let mut device = UdpLink::bind_responder("127.0.0.1:0").unwrap();
        let err = device.write(b"orphan").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }

    #[test]
    fn test_shutdown_marks_closed() {
        let device = UdpLink::bind_responder("127.0.0.1:0").unwrap();
        let device_addr = device.local_addr().unwrap().to_string();
        let mut panel = UdpLink::bind("127.0.0.1:0", &device_addr).unwrap();
        let mut reader = panel.try_clone().unwrap();
        reader
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();

        panel.shutdown().unwrap();
        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        let err = panel.write(b"late").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }

    #[test]
    fn test_empty_datagram_reads_as_zero_bytes() {
        let mut device = UdpLink::bind_responder("127.0.0.1:0").unwrap();
        let device_addr = device.local_addr().unwrap().to_string();
        let mut panel = UdpLink::bind("127.0.0.1:0", &device_addr).unwrap();
        panel
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        device
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        panel.write_all(b"hello").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(device.read(&mut buf).unwrap(), 5);

        assert_eq!(device.write(&[]).unwrap(), 0);
        assert_eq!(panel.read(&mut buf).unwrap(), 0);
        assert!(panel.write(b"still open").is_ok());
    }

    #[test]
    fn test_unresolvable_target() {
        let result = UdpLink::bind("127.0.0.1:0", "not-an-address");
        assert!(result.is_err());
    }
}
