//! TCP and UDP links to a PLC-style device.
//!
//! Provides one I/O type over both transports:
//! - TCP (byte stream, arbitrary chunking)
//! - UDP (one datagram per frame)
//!
//! This is the lowest layer of plclink. Everything else builds on top of
//! the [`LinkStream`] type provided here. Reconnect policy is left to the
//! caller.

pub mod error;
pub mod tcp;
pub mod traits;
pub mod udp;

#[cfg(feature = "async")]
pub mod tokio_tcp;

pub use error::{Result, TransportError};
pub use tcp::{TcpLink, TcpOptions, DEFAULT_CONNECT_TIMEOUT};
pub use traits::LinkStream;
pub use udp::{UdpLink, DEFAULT_LISTEN_PORT, DEFAULT_TARGET_PORT};
