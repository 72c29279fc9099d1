//! # murmur-bridge
//!
//! Relays browser voice clients to a Mumble-protocol voice server.
//!
//! Each browser client gets one [`BridgeSession`] with its own TCP (or TLS)
//! connection to the backend. The session:
//!
//! - reframes the backend byte stream, pulling voice frames out and
//!   forwarding everything else verbatim to the browser's data channel
//! - decodes every remote speaker into its own playout track, smoothed by a
//!   small jitter ring drained on a fixed tick
//! - encodes locally captured PCM into outbound voice frames
//!
//! Signaling and the WebRTC stack itself are left to the embedding
//! application, which plugs in through [`Transport`] and [`PlayoutSink`].
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use murmur_bridge::{BridgeConfig, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = SessionManager::with_opus(BridgeConfig::default())?;
//!     let (events_tx, mut events) = tokio::sync::mpsc::unbounded_channel();
//!     let handle = manager.connect(peer, sink, events_tx).await?;
//!     handle.push_capture(vec![0; 480])?;
//!     // Watch `events` for new speakers...
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod binary;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod socket;
pub mod transport;

pub use binary::{AudioFrame, BinaryCursor};
pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use events::{CloseReason, Event};
pub use session::{BridgeSession, SessionHandle, SessionInput, SessionManager};
pub use socket::StreamFramer;
pub use transport::{PlayoutSink, Transport};
