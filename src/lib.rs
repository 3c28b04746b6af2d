//! # pine-net
//!
//! Framed point-to-point messaging over TCP with:
//! - Length-prefixed binary messages (`type` + `size` header)
//! - A background I/O context per server or client
//! - Per-connection read/write pipelines with strict FIFO ordering
//! - Cooperative, non-blocking drain from the application's frame loop
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Application frame loop                        │
//! │        send / broadcast            update(max, handler)      │
//! └──────────┬───────────────────────────────────▲──────────────┘
//!            │                                   │
//! ┌──────────▼──────────────┐        ┌───────────┴─────────────┐
//! │   Server reactor task   │        │  Inbound ThreadSafeQueue │
//! │ (accept, send, removal) │        │      (OwnedMessage)      │
//! └──────────┬──────────────┘        └───────────▲─────────────┘
//!            │                                   │
//!     ┌──────┴─────────┬────────────────┐        │
//!     ▼                ▼                ▼        │
//! ┌────────┐      ┌────────┐       ┌────────┐    │
//! │ Conn A │      │ Conn B │  ...  │ Conn N │────┘
//! │ rd/wr  │      │ rd/wr  │       │ rd/wr  │
//! └────────┘      └────────┘       └────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use pine_net::{AcceptAll, Message, NetConfig, Server};
//!
//! let mut server = Server::new(NetConfig::builder().port(9000).build(), AcceptAll);
//! server.start()?;
//!
//! loop {
//!     server.update(64, |remote, message| {
//!         if let Some(id) = remote {
//!             server.message_client(id, Message::new(2, message.into_body()));
//!         }
//!     });
//!     # break;
//! }
//! # Ok::<(), pine_net::NetError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod queue;
pub mod protocol;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{NetError, Result};
pub use config::{NetConfig, NetConfigBuilder};
pub use queue::ThreadSafeQueue;
pub use protocol::{ConnectionId, Message, MessageHeader, OwnedMessage};
pub use network::{AcceptAll, Client, Connection, Role, Server, ServerHandler, ServerHandlerFn};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of pine-net
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
