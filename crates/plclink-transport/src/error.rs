/// Errors that can occur in link transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// The address did not resolve to any socket address.
    #[error("address {0} did not resolve")]
    Unresolved(String),

    /// An I/O error occurred on the link.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A datagram link has no peer to send to yet.
    #[error("no peer address known for datagram link")]
    NoPeer,

    /// The link has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Convert into a `std::io::Error`, keeping the underlying error when one exists.
    pub fn into_io(self) -> std::io::Error {
        match self {
            TransportError::Io(io) | TransportError::Accept(io) => io,
            TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => source,
            TransportError::NoPeer | TransportError::Shutdown => {
                std::io::Error::new(std::io::ErrorKind::NotConnected, self)
            }
            other => std::io::Error::other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_address() {
        let err = TransportError::Connect {
            addr: "127.0.0.1:8080".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert!(err.to_string().starts_with("failed to connect to 127.0.0.1:8080"));
    }

    #[test]
    fn test_no_peer_maps_to_not_connected() {
        let io = TransportError::NoPeer.into_io();
        assert_eq!(io.kind(), std::io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_shutdown_maps_to_not_connected() {
        let io = TransportError::Shutdown.into_io();
        assert_eq!(io.kind(), std::io::ErrorKind::NotConnected);
        assert_eq!(io.to_string(), "transport shut down");
    }

    #[test]
    fn test_bind_keeps_source_kind() {
        let err = TransportError::Bind {
            addr: "0.0.0.0:8081".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert_eq!(err.into_io().kind(), std::io::ErrorKind::AddrInUse);
    }
}
