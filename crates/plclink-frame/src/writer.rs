use std::io::{ErrorKind, Write};

use plclink_transport::LinkStream;

use crate::codec::{encode_incoming, encode_outgoing, FrameConfig, IncomingFrame, OutgoingValues};
use crate::error::{FrameError, Result};

/// Writes complete frames to any `Write` stream.
///
/// Each frame is handed to the stream as one buffer, so on a datagram link
/// one frame is one datagram.
pub struct FrameWriter<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Encode and send a panel → device frame.
    pub fn send_outgoing(&mut self, values: &OutgoingValues) -> Result<()> {
        self.send(&encode_outgoing(values))
    }

    /// Encode and send a device → panel frame.
    pub fn send_incoming(&mut self, frame: &IncomingFrame) -> Result<()> {
        self.send(&encode_incoming(frame))
    }

    /// Send already-encoded frame bytes (blocking).
    ///
    /// With a write timeout configured, a write that stays blocked past it
    /// fails with an error for which [`FrameError::is_timeout`] is true.
    pub fn send(&mut self, frame: &[u8]) -> Result<()> {
        let timed = self.config.write_timeout.is_some();
        let mut rest = frame;
        while !rest.is_empty() {
            let written = retry_io(timed, || self.inner.write(rest))?;
            if written == 0 {
                return Err(FrameError::ConnectionClosed);
            }
            rest = &rest[written..];
        }
        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        let timed = self.config.write_timeout.is_some();
        retry_io(timed, || self.inner.flush())
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

/// Run `op` until it yields something other than an interrupt. A
/// would-block is retried only when no write timeout is set, since a socket
/// send timeout surfaces as `WouldBlock` on Unix.
fn retry_io<R>(timed: bool, mut op: impl FnMut() -> std::io::Result<R>) -> Result<R> {
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) if err.kind() == ErrorKind::WouldBlock && !timed => {}
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}

impl FrameWriter<LinkStream> {
    /// Create a frame writer for a device link and apply the write timeout from config.
    pub fn with_config_link(inner: LinkStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(|err| FrameError::Io(err.into_io()))?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::codec::{decode_incoming, decode_outgoing, OUTGOING_FRAME_LEN};

    #[test]
    fn write_outgoing_frame() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let mut values = [0u16; 16];
        values[9] = 12;
        values[0] = 500;

        writer.send_outgoing(&values).unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(wire.len(), OUTGOING_FRAME_LEN);
        assert_eq!(decode_outgoing(&wire).unwrap(), values);
    }

    #[test]
    fn write_incoming_frames_back_to_back() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let mut first = IncomingFrame::default();
        first.ints[9] = 1;
        let mut second = IncomingFrame::default();
        second.flags[20] = true;

        writer.send_incoming(&first).unwrap();
        writer.send_incoming(&second).unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(decode_incoming(&wire[..26]).unwrap(), first);
        assert_eq!(decode_incoming(&wire[26..]).unwrap(), second);
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.send_outgoing(&[0; 16]).unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn short_writes_are_completed() {
        let mut writer = FrameWriter::new(TwoBytesAtATime { data: Vec::new() });
        writer.send_outgoing(&[0xABCD; 16]).unwrap();
        assert_eq!(writer.get_ref().data.len(), OUTGOING_FRAME_LEN);
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let writer_impl = InterruptedWriteThenFlush {
            wrote_once: false,
            flush_interrupted: false,
            data: Vec::new(),
        };

        let mut writer = FrameWriter::new(writer_impl);
        writer.send_outgoing(&[7; 16]).unwrap();

        let inner = writer.into_inner();
        assert_eq!(inner.data.len(), OUTGOING_FRAME_LEN);
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.send_outgoing(&[0; 16]).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn broken_pipe_is_io_error() {
        let mut writer = FrameWriter::new(BrokenWriter);
        let err = writer.send_outgoing(&[0; 16]).unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::BrokenPipe));
    }

    #[test]
    fn applies_write_timeout_for_link() {
        let device = plclink_transport::UdpLink::bind_responder("127.0.0.1:0").unwrap();
        let target = device.local_addr().unwrap().to_string();
        let link = plclink_transport::UdpLink::bind("127.0.0.1:0", &target).unwrap();

        let cfg = FrameConfig {
            write_timeout: Some(std::time::Duration::from_millis(10)),
            ..FrameConfig::default()
        };

        let writer = FrameWriter::with_config_link(link, cfg);
        assert!(writer.is_ok());
    }

    #[test]
    fn would_block_without_timeout_is_retried() {
        let mut writer = FrameWriter::new(BlockingWriter { blocks_left: 3 });
        writer.send_outgoing(&[1; 16]).unwrap();
        assert_eq!(writer.get_ref().blocks_left, 0);
    }

    #[test]
    fn would_block_with_timeout_fails_the_send() {
        let cfg = FrameConfig {
            write_timeout: Some(std::time::Duration::from_millis(50)),
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(BlockingWriter { blocks_left: u32::MAX }, cfg);

        let err = writer.send_outgoing(&[1; 16]).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn stalled_tcp_peer_hits_write_timeout() {
        let listener = plclink_transport::TcpLink::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().to_string();
        let link = plclink_transport::TcpLink::connect(&addr).unwrap();
        // Accepted but never read from.
        let _stalled = listener.accept().unwrap();

        let cfg = FrameConfig {
            write_timeout: Some(std::time::Duration::from_millis(100)),
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config_link(link, cfg).unwrap();

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let result = writer.send(&vec![0u8; 64 << 20]);
            let _ = done_tx.send(result.map_err(|err| err.is_timeout()));
        });

        let result = done_rx
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("send should give up once the write timeout elapses");
        assert_eq!(result, Err(true));
    }

    struct BlockingWriter {
        blocks_left: u32,
    }

    impl Write for BlockingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.blocks_left > 0 {
                self.blocks_left -= 1;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct TwoBytesAtATime {
        data: Vec<u8>,
    }

    impl Write for TwoBytesAtATime {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len().min(2);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct InterruptedWriteThenFlush {
        wrote_once: bool,
        flush_interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedWriteThenFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_interrupted {
                self.flush_interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
