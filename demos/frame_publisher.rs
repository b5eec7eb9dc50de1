//! Synthetic producer example
//!
//! Run with: cargo run --example frame_publisher [RELAY_ADDR] [FPS]
//!
//! Sends a codec-config frame followed by a numbered text payload at the
//! given rate (default 30 fps) until Ctrl+C. Pair it with `relay_server` and
//! watch the payloads arrive with:
//!   nc 127.0.0.1 54001

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use stream_relay::client::{FramePublisher, PublishEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stream_relay=debug".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let addr: SocketAddr = args
        .get(1)
        .map(|s| s.replace("localhost", "127.0.0.1"))
        .unwrap_or_else(|| "127.0.0.1:54000".to_string())
        .parse()?;
    let fps: u64 = match args.get(2) {
        Some(s) => s.parse()?,
        None => 30,
    };
    let frame_interval = Duration::from_micros(1_000_000 / fps.max(1));

    let (mut publisher, mut events) = FramePublisher::new(addr);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PublishEvent::Connected(addr) => println!("Connected to {}", addr),
                PublishEvent::Error(e) => eprintln!("Error: {}", e),
                PublishEvent::Disconnected => println!("Disconnected"),
            }
        }
    });

    publisher.connect().await?;
    publisher
        .send_codec_config(Bytes::from_static(b"codec-config\n"))
        .await?;

    let started = tokio::time::Instant::now();
    let mut interval = tokio::time::interval(frame_interval);
    let mut sequence: u64 = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let elapsed_us = started.elapsed().as_micros() as u64;
                let payload = Bytes::from(format!("frame {}\n", sequence));
                publisher.send_media(payload, elapsed_us).await?;
                sequence += 1;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nSent {} frames", sequence);
                break;
            }
        }
    }

    publisher.disconnect().await;
    Ok(())
}
