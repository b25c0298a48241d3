use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::tcp::TcpOptions;

/// Connect to a device from async code with the same options as the blocking path.
pub async fn connect(addr: &str, options: &TcpOptions) -> Result<TcpStream> {
    let connect = TcpStream::connect(addr);
    let stream = match tokio::time::timeout(options.connect_timeout, connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(TransportError::Connect {
                addr: addr.to_string(),
                source,
            })
        }
        Err(_) => {
            return Err(TransportError::Connect {
                addr: addr.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::TimedOut),
            })
        }
    };
    stream.set_nodelay(options.nodelay)?;
    debug!(addr, "connected over tcp (async)");
    Ok(stream)
}
