//! Connection
//!
//! One TCP stream and the two pipelines that drive it.
//!
//! ## Read pipeline
//! ```text
//! AwaitingHeader ──size == 0──► deliver ──► AwaitingHeader
//!       │
//!       └──size > 0──► AwaitingBody ──► deliver ──► AwaitingHeader
//! ```
//!
//! ## Write pipeline
//! ```text
//! Idle ──send──► WritingHeader ──body──► WritingBody ──► WritingHeader | Idle
//!                      └─────────no body─────────────────┘
//! ```
//!
//! Any I/O error in either pipeline closes the connection for good. Both
//! pipelines run as tasks on the owner's I/O context; they refer to their
//! owner only through the connection id carried in `ConnectionEvent`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::NetConfig;
use crate::error::{NetError, Result};
use crate::protocol::{ConnectionId, Message, MessageHeader, OwnedMessage, HEADER_SIZE};
use crate::queue::ThreadSafeQueue;

/// Which side of the link a connection serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepted by a server; inbound messages carry its id
    Server,

    /// Opened by a client; inbound messages carry no id
    Client,
}

/// Notices sent from pipelines to the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionEvent {
    Closed(ConnectionId),
}

/// State shared between a connection and its pipeline tasks
#[derive(Debug)]
struct Link {
    open: AtomicBool,
    outbound: ThreadSafeQueue<Message>,
    data_to_send: Notify,
    cancel: CancellationToken,
    max_message_size: u32,
}

impl Link {
    /// Queue a message and wake the writer if it was idle
    ///
    /// Messages the peer would refuse as oversized are dropped here, so the
    /// connection survives them.
    fn send(&self, message: Message) {
        if !self.is_open() {
            tracing::debug!("Dropping {} for closed connection", message);
            return;
        }
        if let Err(e) = message.check_size(self.max_message_size) {
            tracing::warn!("Dropping outbound message: {}", e);
            return;
        }

        if self.outbound.push_back_len(message) == 1 {
            self.data_to_send.notify_one();
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.cancel.cancel();
    }

    /// Flip to closed; true only for the first caller
    fn mark_closed(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }
}

/// A single framed TCP connection
pub struct Connection {
    role: Role,
    id: ConnectionId,
    peer_addr: SocketAddr,

    /// Held until the pipelines start
    stream: Option<TcpStream>,

    link: Arc<Link>,
    inbound: Arc<ThreadSafeQueue<OwnedMessage>>,

    max_message_size: u32,
    read_timeout: Option<Duration>,
}

impl Connection {
    /// Wrap an established stream
    ///
    /// The connection is open but idle: nothing is read or written until
    /// `connect_to_client` or the client connect step starts the pipelines.
    pub(crate) fn new(
        role: Role,
        stream: TcpStream,
        inbound: Arc<ThreadSafeQueue<OwnedMessage>>,
        config: &NetConfig,
        parent: &CancellationToken,
    ) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        if config.nodelay {
            stream.set_nodelay(true)?;
        }

        Ok(Self {
            role,
            id: 0,
            peer_addr,
            stream: Some(stream),
            link: Arc::new(Link {
                open: AtomicBool::new(true),
                outbound: ThreadSafeQueue::new(),
                data_to_send: Notify::new(),
                cancel: parent.child_token(),
                max_message_size: config.max_message_size,
            }),
            inbound,
            max_message_size: config.max_message_size,
            read_timeout: config.read_timeout,
        })
    }

    /// Connect to the first reachable address and start both pipelines
    pub(crate) async fn connect_to_server(
        addrs: &[SocketAddr],
        inbound: Arc<ThreadSafeQueue<OwnedMessage>>,
        config: &NetConfig,
        parent: &CancellationToken,
    ) -> Result<Self> {
        let mut last_error = None;

        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let mut connection = Self::new(Role::Client, stream, inbound, config, parent)?;
                    connection.start(None);
                    tracing::info!("Connected to server {}", connection.peer_addr);
                    return Ok(connection);
                }
                Err(source) => {
                    tracing::debug!("Connect to {} failed: {}", addr, source);
                    last_error = Some(NetError::Connect { addr: *addr, source });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| NetError::Resolve("no addresses".to_string())))
    }

    /// Assign the server id and start both pipelines
    pub(crate) fn connect_to_client(
        &mut self,
        id: ConnectionId,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) {
        if self.role != Role::Server {
            tracing::warn!("connect_to_client called on a client connection");
            return;
        }
        self.id = id;
        self.start(Some(events));
    }

    /// Split the stream and spawn the reader and writer on the current runtime
    fn start(&mut self, events: Option<mpsc::UnboundedSender<ConnectionEvent>>) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        let (reader, writer) = stream.into_split();

        let remote = match self.role {
            Role::Server => Some(self.id),
            Role::Client => None,
        };
        let reads = ReadPipeline {
            reader,
            remote,
            inbound: Arc::clone(&self.inbound),
            max_message_size: self.max_message_size,
            read_timeout: self.read_timeout,
        };
        let writes = WritePipeline {
            writer,
            link: Arc::clone(&self.link),
        };

        let exit = PipelineExit {
            id: self.id,
            peer_addr: self.peer_addr,
            link: Arc::clone(&self.link),
            events,
        };

        let link = Arc::clone(&self.link);
        let read_exit = exit.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = link.cancel.cancelled() => Ok(()),
                result = reads.run() => result,
            };
            read_exit.finish("read", result);
        });

        let link = Arc::clone(&self.link);
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = link.cancel.cancelled() => Ok(()),
                result = writes.run() => result,
            };
            exit.finish("write", result);
        });
    }

    /// Queue a message for this peer
    pub fn send(&self, message: Message) {
        self.link.send(message);
    }

    /// Schedule the socket close on the I/O context
    pub fn disconnect(&self) {
        if self.is_connected() {
            self.link.close();
        }
    }

    /// Socket-open flag. Only a failed read or write proves the peer is gone.
    pub fn is_connected(&self) -> bool {
        self.link.is_open()
    }

    /// Server-assigned id; 0 for clients and unapproved connections
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Messages queued but not yet fully written
    pub fn pending_messages(&self) -> usize {
        self.link.outbound.count()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.link.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

// =============================================================================
// Read Pipeline
// =============================================================================

enum ReadState {
    AwaitingHeader,
    AwaitingBody(MessageHeader),
}

struct ReadPipeline {
    reader: OwnedReadHalf,
    remote: Option<ConnectionId>,
    inbound: Arc<ThreadSafeQueue<OwnedMessage>>,
    max_message_size: u32,
    read_timeout: Option<Duration>,
}

impl ReadPipeline {
    /// Runs until the first error; never returns `Ok`
    async fn run(mut self) -> Result<()> {
        let mut state = ReadState::AwaitingHeader;

        loop {
            state = match state {
                ReadState::AwaitingHeader => {
                    let mut raw = [0u8; HEADER_SIZE];
                    self.read_exact(&mut raw).await?;

                    let header = MessageHeader::from_bytes(&raw);
                    header.check_size(self.max_message_size)?;

                    if header.size == 0 {
                        self.deliver(Message::empty(header.message_type));
                        ReadState::AwaitingHeader
                    } else {
                        ReadState::AwaitingBody(header)
                    }
                }
                ReadState::AwaitingBody(header) => {
                    let mut body = BytesMut::zeroed(header.size as usize);
                    self.read_exact(&mut body).await?;

                    self.deliver(Message::new(header.message_type, body.freeze()));
                    ReadState::AwaitingHeader
                }
            };
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.read_timeout {
            Some(limit) => {
                tokio::time::timeout(limit, self.reader.read_exact(buf))
                    .await
                    .map_err(|_| NetError::Timeout)??;
            }
            None => {
                self.reader.read_exact(buf).await?;
            }
        }
        Ok(())
    }

    fn deliver(&self, message: Message) {
        tracing::trace!("Received {} from {:?}", message, self.remote);
        self.inbound.push_back(OwnedMessage::new(self.remote, message));
    }
}

// =============================================================================
// Write Pipeline
// =============================================================================

enum WriteState {
    Idle,
    WritingHeader(Message),
    WritingBody(Message),
}

struct WritePipeline {
    writer: OwnedWriteHalf,
    link: Arc<Link>,
}

impl WritePipeline {
    /// Runs until the first error; never returns `Ok`
    ///
    /// The front message stays queued while it is being written and is
    /// popped only once its last byte is out, so at most one write is ever
    /// in flight and wire order equals queue order.
    async fn run(mut self) -> Result<()> {
        let mut state = WriteState::Idle;

        loop {
            state = match state {
                WriteState::Idle => {
                    if self.link.outbound.is_empty() {
                        self.link.data_to_send.notified().await;
                    }
                    self.next_or_idle()
                }
                WriteState::WritingHeader(message) => {
                    self.writer.write_all(&message.header().to_bytes()).await?;

                    if message.is_empty() {
                        self.link.outbound.pop_front();
                        self.next_or_idle()
                    } else {
                        WriteState::WritingBody(message)
                    }
                }
                WriteState::WritingBody(message) => {
                    self.writer.write_all(message.body()).await?;

                    self.link.outbound.pop_front();
                    self.next_or_idle()
                }
            };
        }
    }

    fn next_or_idle(&self) -> WriteState {
        match self.link.outbound.front() {
            Some(message) => WriteState::WritingHeader(message),
            None => WriteState::Idle,
        }
    }
}

// =============================================================================
// Termination
// =============================================================================

#[derive(Clone)]
struct PipelineExit {
    id: ConnectionId,
    peer_addr: SocketAddr,
    link: Arc<Link>,
    events: Option<mpsc::UnboundedSender<ConnectionEvent>>,
}

impl PipelineExit {
    /// Tear the connection down after either pipeline stops
    ///
    /// The first pipeline to stop cancels the other, which drops both stream
    /// halves and closes the socket. Only that first call reports closure.
    fn finish(&self, pipeline: &str, result: Result<()>) {
        match &result {
            Ok(()) => {
                tracing::debug!("[{}] {} pipeline stopped ({})", self.id, pipeline, self.peer_addr)
            }
            Err(NetError::Io(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::UnexpectedEof
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                        | std::io::ErrorKind::BrokenPipe
                ) =>
            {
                tracing::debug!("[{}] Peer {} disconnected: {}", self.id, self.peer_addr, e)
            }
            Err(e) => {
                tracing::warn!("[{}] {} pipeline failed for {}: {}", self.id, pipeline, self.peer_addr, e)
            }
        }

        if !self.link.mark_closed() {
            return;
        }
        self.link.close();

        if let Some(events) = &self.events {
            let _ = events.send(ConnectionEvent::Closed(self.id));
        }
    }
}
