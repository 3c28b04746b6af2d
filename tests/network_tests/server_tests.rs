//! Tests for Server
//!
//! These tests verify:
//! - Start/stop lifecycle and bind failures
//! - Accept, reject and id assignment
//! - Disconnect detection and lazy removal
//! - Bounded, non-blocking drain
//! - Frame size enforcement
//! - Optional read deadline

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener as StdListener, TcpStream as StdStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pine_net::network::FIRST_CONNECTION_ID;
use pine_net::{
    AcceptAll, Client, Connection, ConnectionId, Message, MessageHeader, NetConfig, NetError,
    Server, ServerHandler, ServerHandlerFn,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn local_config() -> NetConfig {
    NetConfig::builder().bind_addr("127.0.0.1:0").build()
}

fn start_server<H: ServerHandler>(config: NetConfig, handler: H) -> (Server<H>, u16) {
    let mut server = Server::new(config, handler);
    server.start().unwrap();
    let port = server.local_addr().unwrap().port();
    (server, port)
}

fn connect_client(port: u16) -> Client {
    let mut client = Client::new(NetConfig::default());
    client.connect("127.0.0.1", port).unwrap();
    client
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

const WAIT: Duration = Duration::from_secs(5);

/// Handler that records every callback
#[derive(Clone, Default)]
struct Recorder {
    reject: bool,
    connected: Arc<Mutex<Vec<SocketAddr>>>,
    disconnected: Arc<Mutex<Vec<ConnectionId>>>,
}

impl Recorder {
    fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }
}

impl ServerHandler for Recorder {
    fn on_client_connect(&mut self, connection: &Connection) -> bool {
        assert_eq!(connection.id(), 0);
        self.connected.lock().push(connection.peer_addr());
        !self.reject
    }

    fn on_client_disconnect(&mut self, connection: &Connection) {
        self.disconnected.lock().push(connection.id());
    }
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_start_stop_idempotent() {
    let (mut server, _) = start_server(local_config(), AcceptAll);
    assert!(server.is_running());

    server.stop();
    assert!(!server.is_running());
    server.stop();
    assert!(!server.is_running());
}

#[test]
fn test_start_twice_is_rejected() {
    let (mut server, _) = start_server(local_config(), AcceptAll);
    assert!(matches!(server.start(), Err(NetError::AlreadyRunning)));
}

#[test]
fn test_bind_failure_is_reported() {
    let taken = StdListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap();

    let config = NetConfig::builder().bind_addr(addr.to_string()).build();
    let mut server = Server::new(config, AcceptAll);

    assert!(matches!(server.start(), Err(NetError::Bind { .. })));
    assert!(!server.is_running());
    assert!(server.local_addr().is_none());
}

#[test]
fn test_send_before_start_is_dropped() {
    let server = Server::new(local_config(), AcceptAll);
    server.message_client(FIRST_CONNECTION_ID, Message::empty(1));
    server.broadcast(Message::empty(1), None);
    assert_eq!(server.update(10, |_, _| {}), 0);
}

// =============================================================================
// Accept / Reject Tests
// =============================================================================

#[test]
fn test_accept_assigns_id_and_delivers_once() {
    let recorder = Recorder::default();
    let (server, port) = start_server(local_config(), recorder.clone());

    let client = connect_client(port);
    assert!(wait_until(WAIT, || server.connection_count() == 1));
    assert_eq!(recorder.connected.lock().len(), 1);

    client.send(Message::new(1, "hello"));

    let mut received = Vec::new();
    assert!(wait_until(WAIT, || {
        server.update(usize::MAX, |remote, message| received.push((remote, message)));
        !received.is_empty()
    }));

    thread::sleep(Duration::from_millis(50));
    server.update(usize::MAX, |remote, message| received.push((remote, message)));

    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, Some(FIRST_CONNECTION_ID));
    assert_eq!(received[0].1, Message::new(1, "hello"));
}

#[test]
fn test_rejected_connection_is_closed() {
    let recorder = Recorder::rejecting();
    let (server, port) = start_server(local_config(), recorder.clone());

    let client = connect_client(port);
    client.send(Message::new(1, "ignored"));

    assert!(wait_until(WAIT, || recorder.connected.lock().len() == 1));
    assert!(wait_until(WAIT, || !client.is_connected()));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(server.connection_count(), 0);
    assert_eq!(server.update(usize::MAX, |_, _| {}), 0);
    assert!(recorder.disconnected.lock().is_empty());
}

#[test]
fn test_ids_are_never_reused() {
    let (server, port) = start_server(local_config(), AcceptAll);

    let mut first = connect_client(port);
    first.send(Message::empty(1));
    let mut ids = Vec::new();
    assert!(wait_until(WAIT, || {
        server.update(usize::MAX, |remote, _| ids.push(remote));
        ids.len() == 1
    }));
    first.disconnect();
    assert!(wait_until(WAIT, || server.connection_count() == 0));

    let second = connect_client(port);
    second.send(Message::empty(1));
    assert!(wait_until(WAIT, || {
        server.update(usize::MAX, |remote, _| ids.push(remote));
        ids.len() == 2
    }));

    assert_eq!(ids, vec![Some(FIRST_CONNECTION_ID), Some(FIRST_CONNECTION_ID + 1)]);
}

#[test]
fn test_ids_continue_after_restart() {
    let (mut server, port) = start_server(local_config(), AcceptAll);

    let first = connect_client(port);
    first.send(Message::empty(1));
    let mut ids = Vec::new();
    assert!(wait_until(WAIT, || {
        server.update(usize::MAX, |remote, _| ids.push(remote));
        ids.len() == 1
    }));
    drop(first);

    server.stop();
    server.start().unwrap();
    let port = server.local_addr().unwrap().port();

    let second = connect_client(port);
    second.send(Message::empty(1));
    assert!(wait_until(WAIT, || {
        server.update(usize::MAX, |remote, _| ids.push(remote));
        ids.len() == 2
    }));

    assert_eq!(ids, vec![Some(FIRST_CONNECTION_ID), Some(FIRST_CONNECTION_ID + 1)]);
}

#[test]
fn test_closure_pair_handler() {
    let connected = Arc::new(Mutex::new(Vec::new()));
    let disconnected = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let connected = Arc::clone(&connected);
        let disconnected = Arc::clone(&disconnected);
        ServerHandlerFn::new(
            move |connection: &Connection| {
                connected.lock().push(connection.peer_addr());
                true
            },
            move |connection: &Connection| disconnected.lock().push(connection.id()),
        )
    };
    let (server, port) = start_server(local_config(), handler);

    let mut client = connect_client(port);
    assert!(wait_until(WAIT, || server.connection_count() == 1));
    assert_eq!(connected.lock().len(), 1);

    client.disconnect();
    assert!(wait_until(WAIT, || disconnected.lock().len() == 1));
    assert_eq!(disconnected.lock()[0], FIRST_CONNECTION_ID);
}

// =============================================================================
// Disconnect Tests
// =============================================================================

#[test]
fn test_client_disconnect_removes_connection() {
    let recorder = Recorder::default();
    let (server, port) = start_server(local_config(), recorder.clone());

    let mut client = connect_client(port);
    assert!(wait_until(WAIT, || server.connection_count() == 1));

    client.disconnect();
    assert!(!client.is_connected());

    assert!(wait_until(WAIT, || recorder.disconnected.lock().len() == 1));
    assert!(wait_until(WAIT, || server.connection_count() == 0));
    assert_eq!(recorder.disconnected.lock()[0], FIRST_CONNECTION_ID);

    // Broadcasting afterwards neither fails nor reports the peer again.
    server.broadcast(Message::new(3, "after"), None);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.disconnected.lock().len(), 1);
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_message_to_unknown_id_is_ignored() {
    let recorder = Recorder::default();
    let (server, port) = start_server(local_config(), recorder.clone());
    let client = connect_client(port);
    assert!(wait_until(WAIT, || server.connection_count() == 1));

    server.message_client(42, Message::new(1, "nobody"));
    server.message_client(FIRST_CONNECTION_ID, Message::new(1, "somebody"));

    let mut received = Vec::new();
    assert!(wait_until(WAIT, || {
        client.update(usize::MAX, |message| received.push(message));
        !received.is_empty()
    }));
    assert_eq!(received, vec![Message::new(1, "somebody")]);
    assert!(recorder.disconnected.lock().is_empty());
}

#[test]
fn test_stop_closes_clients() {
    let (mut server, port) = start_server(local_config(), AcceptAll);
    let client = connect_client(port);
    assert!(wait_until(WAIT, || server.connection_count() == 1));

    server.stop();
    assert_eq!(server.connection_count(), 0);
    assert!(wait_until(WAIT, || !client.is_connected()));
}

// =============================================================================
// Drain Tests
// =============================================================================

#[test]
fn test_update_is_bounded() {
    let (server, port) = start_server(local_config(), AcceptAll);
    let client = connect_client(port);

    for i in 0..5u32 {
        client.send(Message::new(i, "x"));
    }
    assert!(wait_until(WAIT, || server.incoming().count() == 5));

    let mut types = Vec::new();
    assert_eq!(server.update(2, |_, m| types.push(m.message_type())), 2);
    assert_eq!(server.update(2, |_, m| types.push(m.message_type())), 2);
    assert_eq!(server.update(2, |_, m| types.push(m.message_type())), 1);
    assert_eq!(server.update(2, |_, m| types.push(m.message_type())), 0);

    assert_eq!(types, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_update_on_empty_queue_returns_immediately() {
    let (server, _) = start_server(local_config(), AcceptAll);

    let started = Instant::now();
    let handled = server.update(100, |_, _| panic!("no messages expected"));
    assert_eq!(handled, 0);
    assert!(started.elapsed() < Duration::from_millis(100));
}

// =============================================================================
// Framing Enforcement Tests
// =============================================================================

#[test]
fn test_oversized_frame_closes_connection() {
    let recorder = Recorder::default();
    let config = NetConfig::builder()
        .bind_addr("127.0.0.1:0")
        .max_message_size(16)
        .build();
    let (server, port) = start_server(config, recorder.clone());

    let mut raw = StdStream::connect(("127.0.0.1", port)).unwrap();
    raw.set_read_timeout(Some(WAIT)).unwrap();
    assert!(wait_until(WAIT, || server.connection_count() == 1));

    let header = MessageHeader {
        message_type: 1,
        size: 1024,
    };
    raw.write_all(&header.to_bytes()).unwrap();

    assert!(wait_until(WAIT, || recorder.disconnected.lock().len() == 1));
    assert_eq!(server.connection_count(), 0);

    // The server side is gone: reads see EOF or a reset.
    let mut buf = [0u8; 1];
    assert!(matches!(raw.read(&mut buf), Ok(0) | Err(_)));
    assert_eq!(server.update(usize::MAX, |_, _| {}), 0);
}

#[test]
fn test_raw_peer_frames_are_decoded() {
    let (server, port) = start_server(local_config(), AcceptAll);

    let mut raw = StdStream::connect(("127.0.0.1", port)).unwrap();
    pine_net::protocol::write_message(&mut raw, &Message::new(77, "raw")).unwrap();
    pine_net::protocol::write_message(&mut raw, &Message::empty(78)).unwrap();

    let mut received = Vec::new();
    assert!(wait_until(WAIT, || {
        server.update(usize::MAX, |_, message| received.push(message));
        received.len() == 2
    }));
    assert_eq!(received, vec![Message::new(77, "raw"), Message::empty(78)]);
}

// =============================================================================
// Read Deadline Tests
// =============================================================================

#[test]
fn test_read_timeout_closes_idle_peer() {
    let recorder = Recorder::default();
    let config = NetConfig::builder()
        .bind_addr("127.0.0.1:0")
        .read_timeout(Duration::from_millis(100))
        .build();
    let (server, port) = start_server(config, recorder.clone());

    let _idle = StdStream::connect(("127.0.0.1", port)).unwrap();

    assert!(wait_until(WAIT, || recorder.disconnected.lock().len() == 1));
    assert_eq!(recorder.disconnected.lock()[0], FIRST_CONNECTION_ID);
    assert!(wait_until(WAIT, || server.connection_count() == 0));
}

#[test]
fn test_idle_peer_kept_without_read_timeout() {
    let recorder = Recorder::default();
    let (server, port) = start_server(local_config(), recorder.clone());

    let mut idle = StdStream::connect(("127.0.0.1", port)).unwrap();
    assert!(wait_until(WAIT, || server.connection_count() == 1));

    thread::sleep(Duration::from_millis(500));
    assert_eq!(server.connection_count(), 1);
    assert!(recorder.disconnected.lock().is_empty());

    pine_net::protocol::write_message(&mut idle, &Message::new(1, "late")).unwrap();
    let mut received = Vec::new();
    assert!(wait_until(WAIT, || {
        server.update(usize::MAX, |_, message| received.push(message));
        !received.is_empty()
    }));
    assert_eq!(received, vec![Message::new(1, "late")]);
}
