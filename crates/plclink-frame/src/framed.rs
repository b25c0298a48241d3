//! `tokio_util::codec` adapters over the same wire format.
//!
//! Use with `Framed` on a TCP stream, or `UdpFramed` for datagrams.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{
    decode_incoming, decode_outgoing, put_incoming, put_outgoing, split_frame, IncomingFrame,
    OutgoingValues, INCOMING_FRAME_LEN, OUTGOING_FRAME_LEN,
};
use crate::error::FrameError;

/// Panel side: decodes device frames, encodes command frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanelCodec;

impl Decoder for PanelCodec {
    type Item = IncomingFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match split_frame(src, INCOMING_FRAME_LEN) {
            Some(raw) => decode_incoming(&raw).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<OutgoingValues> for PanelCodec {
    type Error = FrameError;

    fn encode(&mut self, item: OutgoingValues, dst: &mut BytesMut) -> Result<(), Self::Error> {
        put_outgoing(&item, dst);
        Ok(())
    }
}

/// Device side: decodes command frames, encodes device frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceCodec;

impl Decoder for DeviceCodec {
    type Item = OutgoingValues;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match split_frame(src, OUTGOING_FRAME_LEN) {
            Some(raw) => decode_outgoing(&raw).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<IncomingFrame> for DeviceCodec {
    type Error = FrameError;

    fn encode(&mut self, item: IncomingFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        put_incoming(&item, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[tokio::test]
    async fn panel_and_device_codecs_interoperate() {
        let (panel_io, device_io) = tokio::io::duplex(256);
        let (panel_rx, panel_tx) = tokio::io::split(panel_io);
        let (device_rx, device_tx) = tokio::io::split(device_io);

        let mut panel_out = FramedWrite::new(panel_tx, PanelCodec);
        let mut panel_in = FramedRead::new(panel_rx, PanelCodec);
        let mut device_in = FramedRead::new(device_rx, DeviceCodec);
        let mut device_out = FramedWrite::new(device_tx, DeviceCodec);

        let mut command = [0u16; 16];
        command[9] = 5;
        panel_out.send(command).await.unwrap();

        let received = device_in.next().await.unwrap().unwrap();
        assert_eq!(received, command);

        let mut reply = IncomingFrame::default();
        reply.ints[9] = received[9];
        reply.flags[0] = true;
        device_out.send(reply).await.unwrap();

        let status = panel_in.next().await.unwrap().unwrap();
        assert_eq!(status, reply);
    }

    #[test]
    fn decoder_waits_for_full_frame() {
        let mut codec = PanelCodec;
        let mut buf = BytesMut::from(&[0u8; 20][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[0u8; 10]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert_eq!(buf.len(), 4);
    }
}
