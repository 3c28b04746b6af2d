//! TCP Client
//!
//! A single connection in client role and the resolve/connect step in front
//! of it.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::oneshot;

use super::connection::Connection;
use super::context::IoContext;
use crate::config::NetConfig;
use crate::error::{NetError, Result};
use crate::protocol::{Message, OwnedMessage};
use crate::queue::ThreadSafeQueue;

/// TCP client for framed messages
pub struct Client {
    config: NetConfig,
    inbound: Arc<ThreadSafeQueue<OwnedMessage>>,
    context: Option<IoContext>,
    connection: Option<Connection>,
}

impl Client {
    pub fn new(config: NetConfig) -> Self {
        Self {
            config,
            inbound: Arc::new(ThreadSafeQueue::new()),
            context: None,
            connection: None,
        }
    }

    /// Resolve `host`, connect, and start the read and write pipelines
    ///
    /// Resolution and connect run on the client's I/O context; this call only
    /// waits for their outcome. Any previous connection is torn down first.
    /// On failure the client stays disconnected and nothing is retried.
    ///
    /// Must not be called from inside an async runtime.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.disconnect();

        let context = IoContext::start(&self.config)?;
        let (result_tx, result_rx) = oneshot::channel();

        let target = format!("{}:{}", host, port);
        let host = host.to_string();
        let inbound = Arc::clone(&self.inbound);
        let config = self.config.clone();
        let parent = context.shutdown_token();
        context.spawn(async move {
            let attempt = establish(&host, port, inbound, &config, &parent);
            let result = match config.connect_timeout {
                Some(limit) => tokio::time::timeout(limit, attempt)
                    .await
                    .unwrap_or(Err(NetError::Timeout)),
                None => attempt.await,
            };
            let _ = result_tx.send(result);
        });

        let connection = match result_rx.blocking_recv() {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                tracing::error!("[Client] Connect to {} failed: {}", target, e);
                return Err(e);
            }
            Err(_) => return Err(NetError::Runtime("connect task dropped".to_string())),
        };

        self.connection = Some(connection);
        self.context = Some(context);
        Ok(())
    }

    /// Close the socket on the I/O context and stop the context
    ///
    /// Messages already received stay available to `update`.
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.disconnect();
            tracing::info!("[Client] Disconnected from {}", connection.peer_addr());
        }
        if let Some(mut context) = self.context.take() {
            context.stop();
        }
    }

    /// Socket-open flag; a liveness hint only
    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .map(Connection::is_connected)
            .unwrap_or(false)
    }

    /// Address of the connected server
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.connection.as_ref().map(Connection::peer_addr)
    }

    /// Queue a message for the server
    ///
    /// Only the queue push happens on the caller's thread; the writer task on
    /// the I/O context does the socket work. Messages sent while disconnected
    /// are dropped.
    pub fn send(&self, message: Message) {
        match &self.connection {
            Some(connection) => connection.send(message),
            None => tracing::warn!("[Client] Not connected, dropping {}", message),
        }
    }

    /// Handle up to `max_messages` queued inbound messages
    ///
    /// Never waits for messages to arrive. Returns how many were handled.
    pub fn update<F>(&self, max_messages: usize, mut handler: F) -> usize
    where
        F: FnMut(Message),
    {
        let mut count = 0;
        while count < max_messages {
            let Some(owned) = self.inbound.pop_front() else {
                break;
            };
            handler(owned.message);
            count += 1;
        }
        count
    }

    /// The inbound queue
    pub fn incoming(&self) -> &ThreadSafeQueue<OwnedMessage> {
        &self.inbound
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn establish(
    host: &str,
    port: u16,
    inbound: Arc<ThreadSafeQueue<OwnedMessage>>,
    config: &NetConfig,
    parent: &tokio_util::sync::CancellationToken,
) -> Result<Connection> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| NetError::Resolve(format!("{}:{}: {}", host, port, e)))?
        .collect();

    if addrs.is_empty() {
        return Err(NetError::Resolve(format!("{}:{}: no addresses", host, port)));
    }

    Connection::connect_to_server(&addrs, inbound, config, parent).await
}
