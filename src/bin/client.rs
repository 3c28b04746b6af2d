//! pine-net CLI Client
//!
//! Connects to a server, sends messages, and prints what comes back.

use std::time::{Duration, Instant};

use clap::Parser;
use pine_net::{Client, Message, NetConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// pine-net demo client
#[derive(Parser, Debug)]
#[command(name = "pine-client")]
#[command(about = "Send framed messages to a pine-net server")]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "6000")]
    port: u16,

    /// Message type tag
    #[arg(short = 't', long, default_value = "1")]
    message_type: u32,

    /// Number of copies to send
    #[arg(short, long, default_value = "1")]
    count: usize,

    /// How long to wait for replies, in milliseconds
    #[arg(short, long, default_value = "1000")]
    wait_ms: u64,

    /// Connect deadline in milliseconds (none by default)
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// Message body
    body: String,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let mut builder = NetConfig::builder();
    if let Some(ms) = args.connect_timeout_ms {
        builder = builder.connect_timeout(Duration::from_millis(ms));
    }
    let mut client = Client::new(builder.build());

    if let Err(e) = client.connect(&args.host, args.port) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    for _ in 0..args.count {
        client.send(Message::new(args.message_type, args.body.clone().into_bytes()));
    }

    let deadline = Instant::now() + Duration::from_millis(args.wait_ms);
    let mut received = 0;
    while Instant::now() < deadline && received < args.count {
        received += client.update(usize::MAX, |message| {
            println!("[{}] {}", message.message_type(), String::from_utf8_lossy(message.body()));
        });
        if !client.is_connected() {
            eprintln!("Server closed the connection");
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    client.disconnect();
}
