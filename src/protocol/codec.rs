//! Protocol codec
//!
//! Encoding and decoding functions for the frame format.
//!
//! ## Wire Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Type (4) │ Size (4) │            Body             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{Message, MessageHeader};
use crate::error::{NetError, Result};

/// Header size: 4 bytes type + 4 bytes size
pub const HEADER_SIZE: usize = 8;

/// Default maximum body size (16 MB)
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

// =============================================================================
// Header Encoding/Decoding
// =============================================================================

impl MessageHeader {
    /// Encode to network byte order
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u32(self.message_type);
        buf.put_u32(self.size);
        out
    }

    /// Decode from network byte order
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut buf = &bytes[..];
        let message_type = buf.get_u32();
        let size = buf.get_u32();
        Self { message_type, size }
    }

    /// Reject sizes above `max`
    pub fn check_size(&self, max: u32) -> Result<()> {
        if self.size > max {
            return Err(NetError::Protocol(format!(
                "Message too large: {} bytes (max {})",
                self.size, max
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Message Encoding/Decoding
// =============================================================================

/// Encode a message to bytes
///
/// Format: type (4) + size (4) + body. Fails only for bodies the header
/// cannot describe.
pub fn encode_message(message: &Message) -> Result<Bytes> {
    message.check_size(u32::MAX)?;

    let mut out = BytesMut::with_capacity(HEADER_SIZE + message.len());
    out.put_slice(&message.header().to_bytes());
    out.put_slice(message.body());
    Ok(out.freeze())
}

/// Decode one message from the front of `bytes`
///
/// Returns the message and the number of bytes consumed. Trailing bytes are
/// left for the caller. Frames announcing more than `max_size` body bytes are
/// rejected before the body is looked at.
pub fn decode_message(bytes: &[u8], max_size: u32) -> Result<(Message, usize)> {
    if bytes.len() < HEADER_SIZE {
        return Err(NetError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(&bytes[..HEADER_SIZE]);
    let header = MessageHeader::from_bytes(&raw);
    header.check_size(max_size)?;

    let total_len = HEADER_SIZE + header.size as usize;
    if bytes.len() < total_len {
        return Err(NetError::Protocol(format!(
            "Incomplete body: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }

    let body = Bytes::copy_from_slice(&bytes[HEADER_SIZE..total_len]);
    Ok((Message::new(header.message_type, body), total_len))
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete message from a blocking stream
pub fn read_message<R: Read>(reader: &mut R, max_size: u32) -> Result<Message> {
    let mut raw = [0u8; HEADER_SIZE];
    reader.read_exact(&mut raw)?;

    let header = MessageHeader::from_bytes(&raw);
    header.check_size(max_size)?;

    let mut body = vec![0u8; header.size as usize];
    if header.size > 0 {
        reader.read_exact(&mut body)?;
    }

    Ok(Message::new(header.message_type, body))
}

/// Write a message to a blocking stream
pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
    writer.write_all(&encode_message(message)?)?;
    writer.flush()?;
    Ok(())
}
