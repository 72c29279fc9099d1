//! Seams to the peer-to-peer media transport.
//!
//! Session negotiation lives outside this crate. The bridge only needs an
//! ordered, reliable byte channel to the browser ([`Transport`]) and a place
//! to push decoded audio for each remote speaker ([`PlayoutSink`]).

use crate::Result;
use async_trait::async_trait;

/// Async trait for the peer data channel that carries pass-through backend
/// bytes to the browser.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes over the transport.
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Close the transport.
    async fn close(&self) -> Result<()>;
}

/// Outbound audio tracks, one per remote speaker.
///
/// Called from the session task only; implementations should hand samples
/// off without blocking.
pub trait PlayoutSink: Send {
    /// A new speaker appeared and needs its own track.
    fn add_track(&mut self, session_id: u32, track_num: u32) -> Result<()>;

    /// One playout frame of interleaved 16-bit PCM for `session_id`.
    fn play(&mut self, session_id: u32, samples: &[i16]) -> Result<()>;

    fn remove_track(&mut self, session_id: u32);
}
