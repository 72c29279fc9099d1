//! Audio codec seams and the two buffering engines.
//!
//! [`IngestPipeline`] turns backend voice frames into fixed-cadence playout
//! per remote speaker; [`EgressAggregator`] turns captured PCM into backend
//! voice frames.

mod egress;
mod ingest;
#[cfg(feature = "opus")]
mod opus;

pub use egress::EgressAggregator;
pub use ingest::{DrainTimer, IngestPipeline, Ingested, JitterRing, SpeakerAudioState};
#[cfg(feature = "opus")]
pub use opus::{OpusCodecFactory, OpusDecoder, OpusEncoder};

use crate::error::AudioError;

/// Decodes one compressed packet into interleaved 16-bit PCM.
pub trait AudioDecoder: Send {
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>, AudioError>;
}

/// Encodes exactly one frame of interleaved 16-bit PCM.
pub trait AudioEncoder: Send {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>, AudioError>;
}

/// Creates codec state: one decoder per remote speaker, one encoder per session.
pub trait CodecFactory: Send + Sync {
    fn decoder(&self) -> Result<Box<dyn AudioDecoder>, AudioError>;
    fn encoder(&self) -> Result<Box<dyn AudioEncoder>, AudioError>;
}
