//! Bridging sessions.
//!
//! One [`BridgeSession`] per browser client. All of a session's state is owned
//! by its task; the only shared structure is the [`SessionManager`] registry
//! of handles.

mod bridge;
mod manager;

pub use bridge::BridgeSession;
pub use manager::{SessionHandle, SessionManager};

use crate::audio::{CodecFactory, EgressAggregator, IngestPipeline};
use crate::binary::AudioFrame;
use crate::config::BridgeConfig;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Messages delivered to a running session.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionInput {
    /// One chunk of locally captured PCM.
    Capture(Vec<i16>),
    /// Bytes from the peer data channel, written verbatim to the backend.
    PeerData(Bytes),
    /// The backend reported that a speaker left.
    SpeakerLeft(u32),
    Stop,
}

/// Per-session audio state: every remote speaker plus the local encoder.
#[derive(Debug)]
pub struct SessionRegistry {
    connection: Uuid,
    ingest: IngestPipeline,
    egress: EgressAggregator,
    playout_period: Duration,
}

impl SessionRegistry {
    pub fn new(
        connection: Uuid,
        config: &BridgeConfig,
        codecs: Arc<dyn CodecFactory>,
    ) -> crate::Result<Self> {
        let encoder = codecs.encoder()?;
        Ok(Self {
            connection,
            ingest: IngestPipeline::new(codecs, config.jitter_slots, config.playout_frame_samples),
            egress: EgressAggregator::new(
                encoder,
                config.egress_frame_samples,
                config.playout_frame_samples,
                config.send_position,
            ),
            playout_period: config.playout_period(),
        })
    }

    pub fn connection(&self) -> Uuid {
        self.connection
    }

    pub fn ingest(&self) -> &IngestPipeline {
        &self.ingest
    }

    pub fn egress(&self) -> &EgressAggregator {
        &self.egress
    }

    /// Routes a voice frame to its speaker, creating the speaker (and
    /// starting its playout tick) on first sight. Returns the new track
    /// number when a speaker was created.
    ///
    /// Must run inside a tokio runtime.
    pub fn on_audio_frame(&mut self, frame: &AudioFrame) -> crate::Result<Option<u32>> {
        let new_track = self.ingest.ensure_speaker(frame.session_id)?;
        if new_track.is_some() {
            self.ingest.attach_timer(frame.session_id, self.playout_period);
        }
        self.ingest.ingest(frame)?;
        Ok(new_track)
    }

    /// Feeds captured PCM to the encoder; returns a finished backend frame
    /// when one is ready.
    pub fn on_capture(&mut self, samples: &[i16]) -> crate::Result<Option<Bytes>> {
        if self.ingest.is_closing() {
            return Ok(None);
        }
        self.egress.push(samples)
    }

    pub fn speaker_left(&mut self, session_id: u32) -> bool {
        self.ingest.remove_speaker(session_id).is_some()
    }

    /// Resolves when some speaker's playout tick is due.
    pub fn next_drain(&mut self) -> impl Future<Output = u32> + '_ {
        futures::future::poll_fn(move |cx| self.ingest.poll_drain(cx))
    }

    pub fn drain(&mut self, session_id: u32) -> Option<&[i16]> {
        self.ingest.drain(session_id)
    }

    /// Stops all playout ticks and releases speaker state. Returns the
    /// speakers that were still active; later calls return nothing.
    pub fn teardown(&mut self) -> Vec<u32> {
        self.ingest.teardown()
    }

    pub fn is_closing(&self) -> bool {
        self.ingest.is_closing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{packet, FakeCodecs};
    use crate::binary::FrameHeader;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Uuid::new_v4(), &BridgeConfig::default(), Arc::new(FakeCodecs)).unwrap()
    }

    fn frame(session_id: u32, sequence: u64) -> AudioFrame {
        AudioFrame {
            session_id,
            sequence,
            last_packet: false,
            opus: Bytes::from(packet(6, 480)),
            position: None,
        }
    }

    #[tokio::test]
    async fn first_frame_creates_speaker_with_timer() {
        let mut reg = registry();
        assert_eq!(reg.on_audio_frame(&frame(11, 0)).unwrap(), Some(1));
        assert_eq!(reg.on_audio_frame(&frame(11, 1)).unwrap(), None);
        assert!(reg.ingest().speaker(11).unwrap().has_live_timer());

        let due = reg.next_drain().await;
        assert_eq!(due, 11);
        assert_eq!(reg.drain(due).unwrap(), &[6i16; 480][..]);
    }

    #[tokio::test]
    async fn teardown_releases_everything_once() {
        let mut reg = registry();
        reg.on_audio_frame(&frame(1, 0)).unwrap();
        reg.on_audio_frame(&frame(2, 0)).unwrap();
        assert!(reg.speaker_left(1));
        assert!(!reg.speaker_left(1));
        assert_eq!(reg.teardown(), vec![2]);
        assert!(reg.teardown().is_empty());
        assert!(reg.is_closing());
        assert!(reg.drain(2).is_none());
        assert_eq!(reg.on_capture(&[0; 480]).unwrap(), None);
    }

    #[test]
    fn capture_produces_backend_frames() {
        let mut reg = registry();
        let frame = reg.on_capture(&[1; 480]).unwrap().unwrap();
        assert!(FrameHeader::parse(&frame).unwrap().is_audio());
        assert_eq!(reg.egress().sequence(), 1);
    }
}
