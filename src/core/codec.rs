//! # Framed Channel
//!
//! One frame carries one logical message:
//!
//! ```text
//! [Length(4, big-endian)] [UTF-8 payload(Length)]
//! ```
//!
//! [`FrameCodec`] plugs into `tokio_util::codec::Framed`; [`read_frame`] and
//! [`write_frame`] are the single-shot forms used by the broker, which only
//! ever exchanges one frame in each direction per connection.

use bytes::{Buf, BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

use crate::config::DEFAULT_MAX_FRAME_SIZE;
use crate::error::{ProtocolError, Result};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Length-prefixed string codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let length = u32::from_be_bytes(prefix) as usize;

        // Reject before reserving so a hostile prefix cannot force an allocation
        if length > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge(length));
        }

        if src.len() < LENGTH_PREFIX_SIZE + length {
            src.reserve(LENGTH_PREFIX_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let payload = src.split_to(length);

        String::from_utf8(payload.to_vec())
            .map(Some)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(ProtocolError::ChannelClosed),
        }
    }
}

impl Encoder<&str> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<()> {
        let length = item.len();
        if length > self.max_frame_size || length > u32::MAX as usize {
            return Err(ProtocolError::FrameTooLarge(length));
        }

        dst.reserve(LENGTH_PREFIX_SIZE + length);
        dst.put_u32(length as u32);
        dst.put_slice(item.as_bytes());
        Ok(())
    }
}

impl Encoder<String> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        Encoder::<&str>::encode(self, item.as_str(), dst)
    }
}

/// Read exactly one frame.
///
/// Blocks until the whole frame has arrived. A peer that goes away before
/// that, cleanly or mid-frame, yields [`ProtocolError::ChannelClosed`].
pub async fn read_frame<R>(reader: R, max_frame_size: usize) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut framed = FramedRead::new(reader, FrameCodec::new(max_frame_size));
    match framed.next().await {
        Some(Ok(frame)) => Ok(frame),
        Some(Err(ProtocolError::Io(e))) => Err(ProtocolError::from_exchange_error(e)),
        Some(Err(e)) => Err(e),
        None => Err(ProtocolError::ChannelClosed),
    }
}

/// Write exactly one frame and flush it.
pub async fn write_frame<W>(writer: W, payload: &str, max_frame_size: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut framed = FramedWrite::new(writer, FrameCodec::new(max_frame_size));
    framed.send(payload).await.map_err(|e| match e {
        ProtocolError::Io(io) => ProtocolError::from_exchange_error(io),
        other => other,
    })
}
