//! Protocol Module
//!
//! Defines the framing used on every connection.
//!
//! ## Frame Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Type (4) │ Size (4) │        Body (Size bytes)    │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! - Both header fields are big-endian `u32`.
//! - A frame with `Size == 0` has no body bytes at all.
//! - `Type` is carried but never interpreted; unknown values reach the
//!   application unchanged.
//! - There is no handshake or version negotiation.

mod message;
mod codec;

pub use message::{ConnectionId, Message, MessageHeader, OwnedMessage};
pub use codec::{
    decode_message, encode_message, read_message, write_message, HEADER_SIZE, MAX_MESSAGE_SIZE,
};
