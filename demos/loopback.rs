//! Connects one session to a voice server and logs what comes back.
//!
//! Run with: `cargo run --example loopback -- 127.0.0.1:64738`
//!
//! Non-voice backend traffic is printed as it would be forwarded to the
//! browser; every remote speaker gets a track that just counts frames.
//! Press Ctrl-C to stop.

use murmur_bridge::{BridgeConfig, Event, PlayoutSink, SessionManager, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct LoggingPeer;

#[async_trait::async_trait]
impl Transport for LoggingPeer {
    async fn send(&self, data: &[u8]) -> murmur_bridge::Result<()> {
        println!("[peer] {} bytes from backend", data.len());
        Ok(())
    }

    async fn close(&self) -> murmur_bridge::Result<()> {
        println!("[peer] closed");
        Ok(())
    }
}

#[derive(Default)]
struct CountingSink {
    frames: HashMap<u32, u64>,
}

impl PlayoutSink for CountingSink {
    fn add_track(&mut self, session_id: u32, track_num: u32) -> murmur_bridge::Result<()> {
        println!("[sink] track {track_num} for speaker {session_id}");
        self.frames.insert(session_id, 0);
        Ok(())
    }

    fn play(&mut self, session_id: u32, _samples: &[i16]) -> murmur_bridge::Result<()> {
        *self.frames.entry(session_id).or_default() += 1;
        Ok(())
    }

    fn remove_track(&mut self, session_id: u32) {
        let frames = self.frames.remove(&session_id).unwrap_or_default();
        println!("[sink] speaker {session_id} gone after {frames} frames");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .ok();

    let mut config = BridgeConfig::default();
    if let Some(addr) = std::env::args().nth(1) {
        config.backend_addr = addr;
    }

    let manager = SessionManager::with_opus(config)?;
    let (events_tx, mut events) = tokio::sync::mpsc::unbounded_channel();
    println!("Connecting to {}...", manager.config().backend_addr);
    let handle = manager
        .connect(Arc::new(LoggingPeer), Box::new(CountingSink::default()), events_tx)
        .await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(Event::Closed { reason, .. }) => {
                    println!("[event] closed: {reason}");
                    break;
                }
                Some(event) => println!("[event] {event:?}"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping...");
                handle.stop().await?;
            }
        }
    }

    Ok(())
}
