//! Relay server example
//!
//! Run with: cargo run --example relay_server [PRODUCER_ADDR] [CONSUMER_ADDR]
//!
//! Examples:
//!   cargo run --example relay_server                              # 127.0.0.1:54000 / 127.0.0.1:54001
//!   cargo run --example relay_server 0.0.0.0                      # 0.0.0.0:54000 / 127.0.0.1:54001
//!   cargo run --example relay_server 0.0.0.0:6000 0.0.0.0:6001
//!
//! ## Producing
//!
//!   cargo run --example frame_publisher 127.0.0.1:54000
//!
//! ## Playing
//!
//! Players receive the raw payload bytes. For an H.264 Annex-B producer:
//!   ffplay -f h264 tcp://127.0.0.1:54001
//!
//! Set `--replace` to let a new producer take over from the current one.

use std::net::SocketAddr;
use std::time::Duration;

use stream_relay::protocol::constants::{DEFAULT_CONSUMER_PORT, DEFAULT_PRODUCER_PORT};
use stream_relay::{ProducerPolicy, RelayServer, ServerConfig};

/// Parse bind address from command line argument.
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:<default_port>
/// - "127.0.0.1" -> 127.0.0.1:<default_port>
/// - "0.0.0.0:6000" -> 0.0.0.0:6000
fn parse_bind_addr(arg: &str, default_port: u16) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: relay_server [--replace] [PRODUCER_ADDR] [CONSUMER_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!(
        "  PRODUCER_ADDR    Producer listen address (default: 127.0.0.1:{})",
        DEFAULT_PRODUCER_PORT
    );
    eprintln!(
        "  CONSUMER_ADDR    Player listen address (default: 127.0.0.1:{})",
        DEFAULT_CONSUMER_PORT
    );
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --replace        A new producer replaces the active one");
}

fn parse_or_exit(arg: Option<&String>, default: SocketAddr) -> SocketAddr {
    match arg {
        Some(s) => match parse_bind_addr(s, default.port()) {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => default,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let replace = args.iter().any(|a| a == "--replace");
    let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();

    let defaults = ServerConfig::default();
    let producer_addr = parse_or_exit(positional.first().copied(), defaults.producer_addr);
    let consumer_addr = parse_or_exit(positional.get(1).copied(), defaults.consumer_addr);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stream_relay=debug".parse()?)
                .add_directive("relay_server=debug".parse()?),
        )
        .init();

    let policy = if replace {
        ProducerPolicy::Replace
    } else {
        ProducerPolicy::Reject
    };
    let config = ServerConfig::with_addrs(producer_addr, consumer_addr).producer_policy(policy);

    let server = RelayServer::bind(config).await?;
    println!("Producer endpoint: {}", server.producer_addr()?);
    println!("Player endpoint:   {}", server.consumer_addr()?);
    println!();

    // Periodic registry report
    let registry = server.registry().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        interval.tick().await;
        loop {
            interval.tick().await;
            let Ok(stats) = registry.stats().await else {
                break;
            };
            tracing::info!(
                consumers = stats.consumer_count,
                frames = stats.frames_broadcast,
                bytes = stats.bytes_broadcast,
                dropped = stats.consumers_dropped,
                "Relay stats"
            );
        }
    });

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    Ok(())
}
