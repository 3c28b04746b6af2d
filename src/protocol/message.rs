//! Message types
//!
//! The framing unit exchanged over a connection, and its inbound form tagged
//! with the connection that produced it.

use std::fmt;

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{NetError, Result};

/// Server-assigned connection identity (0 means unassigned)
pub type ConnectionId = u32;

/// Fixed-size frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    /// Application-defined tag
    pub message_type: u32,

    /// Body length in bytes
    pub size: u32,
}

/// A complete message: header tag plus body
///
/// The header `size` is always derived from the body, so a `Message` can
/// never disagree with its own length.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    message_type: u32,
    body: Bytes,
}

impl Message {
    /// Create a message from a tag and raw body bytes
    pub fn new(message_type: u32, body: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            body: body.into(),
        }
    }

    /// Create a bodyless message
    pub fn empty(message_type: u32) -> Self {
        Self {
            message_type,
            body: Bytes::new(),
        }
    }

    /// Create a message whose body is the bincode encoding of `value`
    pub fn encode<T: Serialize>(message_type: u32, value: &T) -> Result<Self> {
        let body = bincode::serialize(value)?;
        Ok(Self::new(message_type, body))
    }

    /// Decode the body as a bincode-encoded `T`
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.body)?)
    }

    pub fn message_type(&self) -> u32 {
        self.message_type
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Body length in bytes
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Header describing this message on the wire
    ///
    /// Bodies longer than `u32::MAX` cannot be framed; callers that put a
    /// message on the wire run `check_size` first.
    pub fn header(&self) -> MessageHeader {
        MessageHeader {
            message_type: self.message_type,
            size: u32::try_from(self.body.len()).unwrap_or(u32::MAX),
        }
    }

    /// Reject bodies longer than `max` bytes
    pub fn check_size(&self, max: u32) -> Result<()> {
        match u32::try_from(self.body.len()) {
            Ok(size) if size <= max => Ok(()),
            _ => Err(NetError::Protocol(format!(
                "Message too large: {} bytes (max {})",
                self.body.len(),
                max
            ))),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type: {} size: {}", self.message_type, self.body.len())
    }
}

/// An inbound message and the connection it arrived on
///
/// `remote` is `None` for messages received by a client, whose single peer
/// is implied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMessage {
    pub remote: Option<ConnectionId>,
    pub message: Message,
}

impl OwnedMessage {
    pub fn new(remote: Option<ConnectionId>, message: Message) -> Self {
        Self { remote, message }
    }
}
