//! pine-net Server Binary
//!
//! Accepts clients and echoes or relays every message it receives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pine_net::{Connection, NetConfig, Server, ServerHandler};
use tracing_subscriber::{fmt, EnvFilter};

/// pine-net demo server
#[derive(Parser, Debug)]
#[command(name = "pine-server")]
#[command(about = "Framed TCP message server")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "0.0.0.0:6000")]
    listen: String,

    /// Number of I/O threads
    #[arg(short = 't', long, default_value = "1")]
    io_threads: usize,

    /// Relay each message to every other client instead of echoing it back
    #[arg(short, long)]
    relay: bool,

    /// Maximum messages handled per tick
    #[arg(short, long, default_value = "256")]
    max_messages: usize,

    /// Tick interval in milliseconds
    #[arg(long, default_value = "5")]
    tick_ms: u64,
}

/// Logs every connect and disconnect, accepts everyone
struct LoggingHandler;

impl ServerHandler for LoggingHandler {
    fn on_client_connect(&mut self, connection: &Connection) -> bool {
        tracing::info!("Client connecting from {}", connection.peer_addr());
        true
    }

    fn on_client_disconnect(&mut self, connection: &Connection) {
        tracing::info!("Client {} ({}) left", connection.id(), connection.peer_addr());
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pine_net=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("pine-net server v{}", pine_net::VERSION);
    tracing::info!("Listen address: {}", args.listen);

    let config = NetConfig::builder()
        .bind_addr(&args.listen)
        .io_threads(args.io_threads)
        .build();

    let mut server = Server::new(config, LoggingHandler);
    if let Err(e) = server.start() {
        tracing::error!("Failed to start server: {}", e);
        std::process::exit(1);
    }

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    ctrlc_handler(Arc::clone(&shutdown_flag));

    let tick = Duration::from_millis(args.tick_ms);
    while !shutdown_flag.load(Ordering::Relaxed) {
        server.update(args.max_messages, |remote, message| {
            tracing::debug!("Message from {:?}: {}", remote, message);
            let Some(id) = remote else {
                return;
            };

            if args.relay {
                server.broadcast(message, Some(id));
            } else {
                server.message_client(id, message);
            }
        });
        std::thread::sleep(tick);
    }

    server.stop();
    tracing::info!("Server stopped");
}

/// Set the flag on Ctrl+C
fn ctrlc_handler(flag: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!("Ctrl+C handler unavailable: {}", e);
                return;
            }
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
            flag.store(true, Ordering::Relaxed);
        }
    });
}
