//! Companion Receiver
//!
//! Announces itself to a sender with HELLO datagrams and decodes the audio
//! that comes back. Useful for checking a sender end to end.
//!
//! Usage: `receiver <sender-host:discovery-port> [bind-addr] [sample-rate]`

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hello_caster::codec::OpusDecoder;
use hello_caster::constants::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let sender: SocketAddr = args
        .next()
        .context("missing sender address (host:discovery-port)")?
        .parse()
        .context("invalid sender address")?;
    let bind: SocketAddr = args
        .next()
        .unwrap_or_else(|| format!("0.0.0.0:{}", DEFAULT_AUDIO_PORT))
        .parse()
        .context("invalid bind address")?;
    let sample_rate: u32 = match args.next() {
        Some(rate) => rate.parse().context("invalid sample rate")?,
        None => DEFAULT_SAMPLE_RATE,
    };

    // HELLO must leave from the socket audio arrives on: its source
    // address is what the sender will target.
    let socket = Arc::new(
        UdpSocket::bind(bind)
            .await
            .with_context(|| format!("Failed to bind {}", bind))?,
    );
    tracing::info!(
        "Receiving on {}, announcing to {}",
        socket.local_addr()?,
        sender
    );

    let announcer = {
        let socket = socket.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(Duration::from_secs(1));
            loop {
                timer.tick().await;
                if let Err(e) = socket.send_to(HELLO_MARKER, sender).await {
                    tracing::warn!("HELLO to {} failed: {}", sender, e);
                }
            }
        })
    };

    let mut decoder = OpusDecoder::new(sample_rate)?;
    let mut buf = vec![0u8; MAX_PACKET_SIZE * 4];
    let mut packets: u64 = 0;
    let mut bytes: u64 = 0;
    let mut samples: u64 = 0;
    let mut errors: u64 = 0;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut stats_timer = tokio::time::interval(Duration::from_secs(5));
    stats_timer.tick().await;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = socket.recv_from(&mut buf) => {
                let len = match received {
                    Ok((len, _)) => len,
                    Err(e) => {
                        tracing::debug!("Receive failed: {}", e);
                        continue;
                    }
                };

                packets += 1;
                bytes += len as u64;
                match decoder.decode(&buf[..len]) {
                    Ok(pcm) => samples += pcm.len() as u64 / 2,
                    Err(e) => {
                        errors += 1;
                        tracing::warn!("Decode error: {}", e);
                    }
                }
            }
            _ = stats_timer.tick() => {
                tracing::info!(
                    "Stats: {} packets, {:.1} KB, {:.2}s of audio, {} decode errors",
                    packets,
                    bytes as f64 / 1024.0,
                    samples as f64 / sample_rate as f64,
                    errors
                );
            }
        }
    }

    announcer.abort();
    tracing::info!("Receiver stopped after {} packets", packets);
    Ok(())
}
