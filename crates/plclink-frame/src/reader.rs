use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use plclink_transport::LinkStream;
use tracing::trace;

use crate::codec::{decode_incoming, decode_outgoing, split_frame, FrameConfig, Framing};
use crate::codec::{IncomingFrame, OutgoingValues};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;
const READ_CHUNK_SIZE: usize = 2048;

/// Reads complete frames from any `Read` stream.
///
/// With stream framing, partial and combined reads are reassembled so
/// callers always get whole frames. With datagram framing, each read is
/// returned as one frame, whatever its length.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next raw frame (blocking).
    ///
    /// With stream framing, returns `Err(FrameError::ConnectionClosed)` when
    /// EOF is reached. Buffered partial data survives a timed-out read.
    pub fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            if let Framing::Stream { frame_len } = self.config.framing {
                if let Some(frame) = split_frame(&mut self.buf, frame_len) {
                    trace!(frame_len, buffered = self.buf.len(), "stream frame reassembled");
                    return Ok(frame);
                }
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            match self.config.framing {
                // Zero-length datagrams are frames too; decoding rejects them.
                Framing::Datagram => {
                    trace!(len = read, "datagram frame read");
                    return Ok(Bytes::copy_from_slice(&chunk[..read]));
                }
                Framing::Stream { .. } if read == 0 => return Err(FrameError::ConnectionClosed),
                Framing::Stream { .. } => self.buf.extend_from_slice(&chunk[..read]),
            }
        }
    }

    /// Read and decode the next device → panel frame.
    pub fn read_incoming(&mut self) -> Result<IncomingFrame> {
        let raw = self.read_frame()?;
        decode_incoming(&raw)
    }

    /// Read and decode the next panel → device frame.
    pub fn read_outgoing(&mut self) -> Result<OutgoingValues> {
        let raw = self.read_frame()?;
        decode_outgoing(&raw)
    }

    /// Bytes buffered towards the next stream frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<LinkStream> {
    /// Create a frame reader for a device link and apply the read timeout from config.
    pub fn with_config_link(inner: LinkStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(|err| FrameError::Io(err.into_io()))?;
        Ok(Self::with_config(inner, config))
    }
}
