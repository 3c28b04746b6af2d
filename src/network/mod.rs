//! Network Module
//!
//! TCP server and client on top of the frame protocol.
//!
//! ## Architecture
//! - One I/O context (tokio runtime + background thread) per server or client
//! - One reader task and one writer task per connection
//! - Server connection map owned by a single reactor task
//! - Inbound messages drained by the application with `update`

mod context;
mod connection;
mod server;
mod client;

pub use context::IoContext;
pub use connection::{Connection, Role};
pub use server::{AcceptAll, Server, ServerHandler, ServerHandlerFn, FIRST_CONNECTION_ID};
pub use client::Client;
