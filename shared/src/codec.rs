//! Length-prefixed codec for the fallback stream transport
//!
//! All messages are framed as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: UTF-8 JSON message ]
//! ```
//!
//! This keeps message boundaries intact over TCP streams.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Maximum message size (64 KiB); control messages are small
pub const MAX_MESSAGE_SIZE: u32 = 64 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),

    #[error("Invalid message length prefix: {0}")]
    InvalidLength(u32),
}

/// Encode a message into a length-prefixed byte buffer
pub fn encode(message: &[u8]) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(4 + message.len());
    encode_into(message, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a message directly into a provided buffer
pub fn encode_into(message: &[u8], buf: &mut BytesMut) -> Result<(), CodecError> {
    if message.len() > MAX_MESSAGE_SIZE as usize {
        return Err(CodecError::MessageTooLarge(message.len()));
    }

    buf.reserve(4 + message.len());
    buf.put_u32(message.len() as u32);
    buf.put_slice(message);

    Ok(())
}

/// Try to decode one length-prefixed message from a buffer
///
/// Returns:
/// - `Ok(Some(message))` if a complete message was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the length prefix is invalid
pub fn decode(buf: &mut BytesMut) -> Result<Option<Bytes>, CodecError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    // Peek at the length prefix without consuming
    let msg_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

    if msg_len > MAX_MESSAGE_SIZE {
        return Err(CodecError::InvalidLength(msg_len));
    }

    let total_len = 4 + msg_len as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    buf.advance(4);
    Ok(Some(buf.split_to(msg_len as usize).freeze()))
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial frame data being accumulated
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<Bytes>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Drop any partially received data (after a protocol error)
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] = br#"{"sessionId":"s-1","action":"BT_READY"}"#;

    #[test]
    fn test_encode_prefix() {
        let encoded = encode(MESSAGE).expect("encode failed");

        let len_prefix = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(len_prefix as usize, MESSAGE.len());
        assert_eq!(&encoded[4..], MESSAGE);
    }

    #[test]
    fn test_partial_decode() {
        let encoded = encode(MESSAGE).expect("encode failed");

        let mut buf = BytesMut::from(&encoded[..5]);
        let result = decode(&mut buf).expect("decode should not fail on partial data");
        assert!(result.is_none(), "should return None for partial data");

        // Buffer should be unchanged (data not consumed)
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_frame_decoder_chunks() {
        let encoded = encode(MESSAGE).expect("encode failed");
        let mut decoder = FrameDecoder::new();

        decoder.extend(&encoded[..7]);
        assert!(decoder.decode_next().expect("decode error").is_none());

        decoder.extend(&encoded[7..]);
        let decoded = decoder
            .decode_next()
            .expect("decode error")
            .expect("should have message");
        assert_eq!(&decoded[..], MESSAGE);
        assert_eq!(decoder.buffer_len(), 0);
    }

    #[test]
    fn test_multiple_frames() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&encode(MESSAGE).expect("encode failed"));
        decoder.extend(&encode(b"{}").expect("encode failed"));

        assert_eq!(&decoder.decode_next().unwrap().unwrap()[..], MESSAGE);
        assert_eq!(&decoder.decode_next().unwrap().unwrap()[..], b"{}");
        assert!(decoder.decode_next().expect("decode error").is_none());
    }

    #[test]
    fn test_message_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_MESSAGE_SIZE + 1);
        buf.put_bytes(0, 100);

        let result = decode(&mut buf);
        assert!(matches!(result, Err(CodecError::InvalidLength(_))));

        let oversized = vec![0u8; MAX_MESSAGE_SIZE as usize + 1];
        assert!(matches!(
            encode(&oversized),
            Err(CodecError::MessageTooLarge(_))
        ));
    }
}
