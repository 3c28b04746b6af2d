//! TCP Server
//!
//! Accepts connections and fans their messages into one inbound queue.
//!
//! The live connection map is owned by a single reactor task on the I/O
//! context. Accepts, sends, broadcasts and closure notices are all handled
//! by that task one at a time, so the map needs no lock. Application
//! threads reach it only through the command channel.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::connection::{Connection, ConnectionEvent, Role};
use super::context::IoContext;
use crate::config::NetConfig;
use crate::error::{NetError, Result};
use crate::protocol::{ConnectionId, Message, OwnedMessage};
use crate::queue::ThreadSafeQueue;

/// First id handed out to an approved connection
pub const FIRST_CONNECTION_ID: ConnectionId = 10000;

/// Application callbacks for connection lifecycle
///
/// Both methods run on the I/O context.
pub trait ServerHandler: Send + 'static {
    /// Decide whether to keep a freshly accepted connection
    ///
    /// The connection has no id yet. Returning `false` closes it immediately.
    fn on_client_connect(&mut self, connection: &Connection) -> bool;

    /// A live connection was found closed and has been removed
    fn on_client_disconnect(&mut self, _connection: &Connection) {}
}

/// Any `FnMut(&Connection) -> bool` closure works as an accept-only handler
impl<F> ServerHandler for F
where
    F: FnMut(&Connection) -> bool + Send + 'static,
{
    fn on_client_connect(&mut self, connection: &Connection) -> bool {
        self(connection)
    }
}

/// Handler built from a connect closure and a disconnect closure
///
/// ```no_run
/// use pine_net::{NetConfig, Server, ServerHandlerFn};
///
/// let handler = ServerHandlerFn::new(
///     |connection| connection.peer_addr().ip().is_loopback(),
///     |connection| println!("{} left", connection.id()),
/// );
/// let mut server = Server::new(NetConfig::default(), handler);
/// server.start().unwrap();
/// ```
pub struct ServerHandlerFn<C, D> {
    on_connect: C,
    on_disconnect: D,
}

impl<C, D> ServerHandlerFn<C, D>
where
    C: FnMut(&Connection) -> bool + Send + 'static,
    D: FnMut(&Connection) + Send + 'static,
{
    pub fn new(on_connect: C, on_disconnect: D) -> Self {
        Self {
            on_connect,
            on_disconnect,
        }
    }
}

impl<C, D> ServerHandler for ServerHandlerFn<C, D>
where
    C: FnMut(&Connection) -> bool + Send + 'static,
    D: FnMut(&Connection) + Send + 'static,
{
    fn on_client_connect(&mut self, connection: &Connection) -> bool {
        (self.on_connect)(connection)
    }

    fn on_client_disconnect(&mut self, connection: &Connection) {
        (self.on_disconnect)(connection)
    }
}

/// Handler that accepts every connection
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl ServerHandler for AcceptAll {
    fn on_client_connect(&mut self, connection: &Connection) -> bool {
        tracing::debug!("Accepting {}", connection.peer_addr());
        true
    }
}

/// Requests from application threads to the reactor
#[derive(Debug)]
enum ServerCommand {
    MessageClient {
        id: ConnectionId,
        message: Message,
    },
    Broadcast {
        message: Message,
        exclude: Option<ConnectionId>,
    },
}

/// TCP server for framed messages
pub struct Server<H: ServerHandler> {
    config: NetConfig,
    handler: Arc<Mutex<H>>,
    inbound: Arc<ThreadSafeQueue<OwnedMessage>>,

    /// Live connection count, published by the reactor
    live: Arc<AtomicUsize>,

    /// Next id to hand out; outlives restarts so ids are never reused
    next_id: Arc<AtomicU32>,

    context: Option<IoContext>,
    commands: Option<mpsc::UnboundedSender<ServerCommand>>,
    local_addr: Option<SocketAddr>,
}

impl<H: ServerHandler> Server<H> {
    /// Create a new server; nothing is bound until `start`
    pub fn new(config: NetConfig, handler: H) -> Self {
        Self {
            config,
            handler: Arc::new(Mutex::new(handler)),
            inbound: Arc::new(ThreadSafeQueue::new()),
            live: Arc::new(AtomicUsize::new(0)),
            next_id: Arc::new(AtomicU32::new(FIRST_CONNECTION_ID)),
            context: None,
            commands: None,
            local_addr: None,
        }
    }

    /// Bind, arm the accept loop, and run the I/O context in the background
    ///
    /// A bind failure is returned once and leaves the server stopped.
    pub fn start(&mut self) -> Result<()> {
        if self.context.is_some() {
            return Err(NetError::AlreadyRunning);
        }

        let std_listener = std::net::TcpListener::bind(&self.config.bind_addr).map_err(|source| {
            tracing::error!("[Server] Bind to {} failed: {}", self.config.bind_addr, source);
            NetError::Bind {
                addr: self.config.bind_addr.clone(),
                source,
            }
        })?;
        std_listener.set_nonblocking(true)?;
        let local_addr = std_listener.local_addr()?;

        let context = IoContext::start(&self.config)?;
        let listener = {
            let _guard = context.handle().enter();
            TcpListener::from_std(std_listener)?
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let reactor = Reactor {
            connections: HashMap::new(),
            next_id: Arc::clone(&self.next_id),
            handler: Arc::clone(&self.handler),
            inbound: Arc::clone(&self.inbound),
            live: Arc::clone(&self.live),
            config: self.config.clone(),
            events: event_tx,
            shutdown: context.shutdown_token(),
        };
        context.spawn(reactor.run(listener, command_rx, event_rx));

        tracing::info!("[Server] Started on {}", local_addr);

        self.context = Some(context);
        self.commands = Some(command_tx);
        self.local_addr = Some(local_addr);
        Ok(())
    }

    /// Stop the I/O context and join its thread(s)
    ///
    /// Closes every connection. Safe to call more than once. Messages already
    /// in the inbound queue stay available to `update`.
    pub fn stop(&mut self) {
        self.commands = None;
        if let Some(mut context) = self.context.take() {
            context.stop();
            self.live.store(0, Ordering::Release);
            tracing::info!("[Server] Stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.context.is_some()
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of live connections as last seen by the reactor
    pub fn connection_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Send a message to one connection
    ///
    /// A connection found closed is removed and reported through
    /// `on_client_disconnect`. Unknown ids are ignored.
    pub fn message_client(&self, id: ConnectionId, message: Message) {
        self.post(ServerCommand::MessageClient { id, message });
    }

    /// Send a message to every live connection except `exclude`
    pub fn broadcast(&self, message: Message, exclude: Option<ConnectionId>) {
        self.post(ServerCommand::Broadcast { message, exclude });
    }

    /// Handle up to `max_messages` queued inbound messages
    ///
    /// Never waits for messages to arrive. Returns how many were handled.
    pub fn update<F>(&self, max_messages: usize, mut handler: F) -> usize
    where
        F: FnMut(Option<ConnectionId>, Message),
    {
        let mut count = 0;
        while count < max_messages {
            let Some(owned) = self.inbound.pop_front() else {
                break;
            };
            handler(owned.remote, owned.message);
            count += 1;
        }
        count
    }

    /// Handle every message currently queued
    pub fn update_all<F>(&self, handler: F) -> usize
    where
        F: FnMut(Option<ConnectionId>, Message),
    {
        self.update(usize::MAX, handler)
    }

    /// The shared inbound queue
    pub fn incoming(&self) -> &ThreadSafeQueue<OwnedMessage> {
        &self.inbound
    }

    fn post(&self, command: ServerCommand) {
        let Some(commands) = &self.commands else {
            tracing::warn!("[Server] Not running, dropping {:?}", command);
            return;
        };
        if commands.send(command).is_err() {
            tracing::warn!("[Server] Reactor is gone, command dropped");
        }
    }
}

impl<H: ServerHandler> Drop for Server<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Reactor
// =============================================================================

struct Reactor<H: ServerHandler> {
    connections: HashMap<ConnectionId, Connection>,
    next_id: Arc<AtomicU32>,
    handler: Arc<Mutex<H>>,
    inbound: Arc<ThreadSafeQueue<OwnedMessage>>,
    live: Arc<AtomicUsize>,
    config: NetConfig,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    shutdown: CancellationToken,
}

impl<H: ServerHandler> Reactor<H> {
    async fn run(
        mut self,
        listener: TcpListener,
        mut commands: mpsc::UnboundedReceiver<ServerCommand>,
        mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => self.on_accept(accepted),
                Some(command) = commands.recv() => self.on_command(command),
                Some(event) = events.recv() => self.on_event(event),
            }
            self.live.store(self.connections.len(), Ordering::Release);
        }

        tracing::debug!("[Server] Reactor exiting with {} connection(s)", self.connections.len());
        self.connections.clear();
    }

    fn on_accept(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) {
        let (stream, peer_addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!("[Server] New connection error: {}", e);
                return;
            }
        };
        tracing::info!("[Server] New connection: {}", peer_addr);

        let mut connection = match Connection::new(
            Role::Server,
            stream,
            Arc::clone(&self.inbound),
            &self.config,
            &self.shutdown,
        ) {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!("[Server] Failed to set up {}: {}", peer_addr, e);
                return;
            }
        };

        if !self.handler.lock().on_client_connect(&connection) {
            tracing::info!("[Server] Connection denied: {}", peer_addr);
            return;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        connection.connect_to_client(id, self.events.clone());
        self.connections.insert(id, connection);
        tracing::info!("[Server] Connection {} approved", id);
    }

    fn on_command(&mut self, command: ServerCommand) {
        match command {
            ServerCommand::MessageClient { id, message } => {
                let connected = match self.connections.get(&id) {
                    Some(connection) => connection.is_connected(),
                    None => {
                        tracing::debug!("[Server] No connection {}, message dropped", id);
                        return;
                    }
                };
                if connected {
                    if let Some(connection) = self.connections.get(&id) {
                        connection.send(message);
                    }
                } else {
                    self.remove(id);
                }
            }
            ServerCommand::Broadcast { message, exclude } => {
                let mut dead = Vec::new();
                for (id, connection) in &self.connections {
                    if !connection.is_connected() {
                        dead.push(*id);
                    } else if Some(*id) != exclude {
                        connection.send(message.clone());
                    }
                }
                for id in dead {
                    self.remove(id);
                }
            }
        }
    }

    fn on_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Closed(id) => self.remove(id),
        }
    }

    /// Drop a connection from the live set and report it
    ///
    /// Removal is the guard that keeps the disconnect callback to one call
    /// per connection, whichever path notices the closure first.
    fn remove(&mut self, id: ConnectionId) {
        if let Some(connection) = self.connections.remove(&id) {
            tracing::info!("[Server] Connection {} removed", id);
            self.handler.lock().on_client_disconnect(&connection);
        }
    }
}
