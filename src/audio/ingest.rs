//! Per-speaker decode and jitter-buffered playout.
//!
//! Voice frames arrive in bursts; the playout track wants exactly one frame
//! every tick. Each remote speaker gets a small ring of decoded packets that
//! the frame-arrival path fills and the drain timer empties. Both paths run
//! on the session task, so the ring is never touched by two callers at once.

use super::{AudioDecoder, CodecFactory};
use crate::binary::AudioFrame;
use crate::error::AudioError;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

/// Largest ring supported by the occupancy bitmap.
pub const MAX_JITTER_SLOTS: usize = 64;

/// Fixed ring of decoded packets with an occupancy bitmap.
///
/// `write` is where the next packet goes, `read` is the slot being played.
/// A slot holds one decoded packet, which may span several playout frames.
#[derive(Debug)]
pub struct JitterRing {
    slots: Vec<Vec<i16>>,
    occupied: u64,
    write: usize,
    read: usize,
    read_offset: usize,
    frame_samples: usize,
    playout: Vec<i16>,
}

impl JitterRing {
    pub fn new(slots: usize, frame_samples: usize) -> Self {
        let slots = slots.clamp(1, MAX_JITTER_SLOTS);
        Self {
            slots: vec![Vec::new(); slots],
            occupied: 0,
            write: 0,
            read: 0,
            read_offset: 0,
            frame_samples,
            playout: Vec::with_capacity(frame_samples),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of filled slots.
    pub fn len(&self) -> usize {
        self.occupied.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    fn is_occupied(&self, idx: usize) -> bool {
        self.occupied & (1 << idx) != 0
    }

    /// Stores a decoded packet in the first free slot at or after the write
    /// cursor. Returns false (and stores nothing) when every slot is full.
    pub fn push(&mut self, pcm: &[i16]) -> bool {
        let n = self.capacity();
        for i in 0..n {
            let idx = (self.write + i) % n;
            if !self.is_occupied(idx) {
                let slot = &mut self.slots[idx];
                slot.clear();
                slot.extend_from_slice(pcm);
                self.occupied |= 1 << idx;
                self.write = (idx + 1) % n;
                return true;
            }
        }
        false
    }

    /// Takes one playout frame from the slot under the read cursor.
    ///
    /// Returns `None` on underrun. A slot whose tail is shorter than a frame
    /// is zero-padded so the track always receives whole frames.
    pub fn drain(&mut self) -> Option<&[i16]> {
        if !self.is_occupied(self.read) {
            return None;
        }
        let slot = &self.slots[self.read];
        let end = (self.read_offset + self.frame_samples).min(slot.len());
        self.playout.clear();
        self.playout.extend_from_slice(&slot[self.read_offset..end]);
        self.playout.resize(self.frame_samples, 0);
        self.read_offset = end;

        if self.read_offset >= slot.len() {
            self.occupied &= !(1 << self.read);
            self.read = (self.read + 1) % self.capacity();
            self.read_offset = 0;
        }
        Some(self.playout.as_slice())
    }

    pub fn clear(&mut self) {
        self.occupied = 0;
        self.write = 0;
        self.read = 0;
        self.read_offset = 0;
    }
}

/// Periodic playout tick for one speaker.
///
/// `stop` flips the liveness flag checked on every poll, so a timer that is
/// still referenced somewhere never fires again once stopped.
#[derive(Debug)]
pub struct DrainTimer {
    interval: Interval,
    live: bool,
}

impl DrainTimer {
    /// Starts ticking every `period`. Must be called inside a tokio runtime.
    pub fn start(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
        Self {
            interval,
            live: true,
        }
    }

    pub fn stop(&mut self) {
        self.live = false;
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn poll_fire(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        if !self.live {
            return Poll::Pending;
        }
        self.interval.poll_tick(cx).map(|_| ())
    }
}

/// Outcome of handing one voice frame to the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ingested {
    Stored,
    /// Every slot was occupied; the frame was dropped.
    RingFull,
    DecodeFailed,
    /// The session is tearing down.
    Closing,
}

/// Decode and playout state of one remote speaker.
pub struct SpeakerAudioState {
    session_id: u32,
    track_num: u32,
    ring: JitterRing,
    decoder: Box<dyn AudioDecoder>,
    drain_timer: Option<DrainTimer>,
    last_sequence: Option<u64>,
    stored: u64,
    dropped: u64,
}

impl std::fmt::Debug for SpeakerAudioState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeakerAudioState")
            .field("session_id", &self.session_id)
            .field("track_num", &self.track_num)
            .field("buffered", &self.ring.len())
            .field("stored", &self.stored)
            .field("dropped", &self.dropped)
            .finish_non_exhaustive()
    }
}

impl SpeakerAudioState {
    fn new(session_id: u32, track_num: u32, decoder: Box<dyn AudioDecoder>, ring: JitterRing) -> Self {
        Self {
            session_id,
            track_num,
            ring,
            decoder,
            drain_timer: None,
            last_sequence: None,
            stored: 0,
            dropped: 0,
        }
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn track_num(&self) -> u32 {
        self.track_num
    }

    pub fn ring(&self) -> &JitterRing {
        &self.ring
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn stored(&self) -> u64 {
        self.stored
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn has_live_timer(&self) -> bool {
        self.drain_timer.as_ref().is_some_and(DrainTimer::is_live)
    }

    fn accept(&mut self, frame: &AudioFrame) -> Ingested {
        self.last_sequence = Some(frame.sequence);
        let pcm = match self.decoder.decode(&frame.opus) {
            Ok(pcm) => pcm,
            Err(e) => {
                self.dropped += 1;
                tracing::warn!(session_id = self.session_id, sequence = frame.sequence, error = %e, "dropping undecodable frame");
                return Ingested::DecodeFailed;
            }
        };
        if self.ring.push(&pcm) {
            self.stored += 1;
            Ingested::Stored
        } else {
            self.dropped += 1;
            tracing::warn!(
                session_id = self.session_id,
                sequence = frame.sequence,
                samples = pcm.len(),
                "all jitter slots full, dropping frame"
            );
            Ingested::RingFull
        }
    }

    fn stop(&mut self) {
        if let Some(timer) = self.drain_timer.as_mut() {
            timer.stop();
        }
        self.drain_timer = None;
        self.ring.clear();
    }
}

/// All remote speakers of one bridging session.
pub struct IngestPipeline {
    codecs: Arc<dyn CodecFactory>,
    speakers: HashMap<u32, SpeakerAudioState>,
    slots: usize,
    frame_samples: usize,
    next_track: u32,
    closing: bool,
}

impl std::fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("speakers", &self.speakers)
            .field("closing", &self.closing)
            .finish_non_exhaustive()
    }
}

impl IngestPipeline {
    pub fn new(codecs: Arc<dyn CodecFactory>, slots: usize, frame_samples: usize) -> Self {
        Self {
            codecs,
            speakers: HashMap::new(),
            slots,
            frame_samples,
            next_track: 0,
            closing: false,
        }
    }

    fn speaker_entry(&mut self, session_id: u32) -> Result<(&mut SpeakerAudioState, bool), AudioError> {
        match self.speakers.entry(session_id) {
            Entry::Occupied(e) => Ok((e.into_mut(), false)),
            Entry::Vacant(e) => {
                let decoder = self.codecs.decoder()?;
                self.next_track += 1;
                let ring = JitterRing::new(self.slots, self.frame_samples);
                tracing::debug!(session_id, track = self.next_track, "adding speaker");
                Ok((
                    e.insert(SpeakerAudioState::new(session_id, self.next_track, decoder, ring)),
                    true,
                ))
            }
        }
    }

    /// Creates the speaker if unknown. Returns its track number when new.
    pub fn ensure_speaker(&mut self, session_id: u32) -> Result<Option<u32>, AudioError> {
        if self.closing {
            return Ok(None);
        }
        let (speaker, created) = self.speaker_entry(session_id)?;
        Ok(created.then_some(speaker.track_num))
    }

    /// Decodes a voice frame into its speaker's ring.
    pub fn ingest(&mut self, frame: &AudioFrame) -> Result<Ingested, AudioError> {
        if self.closing {
            return Ok(Ingested::Closing);
        }
        let (speaker, _) = self.speaker_entry(frame.session_id)?;
        Ok(speaker.accept(frame))
    }

    /// Starts the playout tick of an existing speaker.
    pub fn attach_timer(&mut self, session_id: u32, period: Duration) -> bool {
        if self.closing {
            return false;
        }
        match self.speakers.get_mut(&session_id) {
            Some(speaker) => {
                speaker.drain_timer = Some(DrainTimer::start(period));
                true
            }
            None => false,
        }
    }

    /// Next playout frame for a speaker, or `None` on underrun.
    pub fn drain(&mut self, session_id: u32) -> Option<&[i16]> {
        if self.closing {
            return None;
        }
        self.speakers.get_mut(&session_id)?.ring.drain()
    }

    /// Resolves with the session id of a speaker whose tick is due.
    pub fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<u32> {
        if self.closing {
            return Poll::Pending;
        }
        for (id, speaker) in self.speakers.iter_mut() {
            if let Some(timer) = speaker.drain_timer.as_mut() {
                if timer.poll_fire(cx).is_ready() {
                    return Poll::Ready(*id);
                }
            }
        }
        Poll::Pending
    }

    /// Stops the speaker's timer and releases its state.
    pub fn remove_speaker(&mut self, session_id: u32) -> Option<SpeakerAudioState> {
        let mut speaker = self.speakers.remove(&session_id)?;
        speaker.stop();
        tracing::debug!(session_id, stored = speaker.stored, dropped = speaker.dropped, "speaker removed");
        Some(speaker)
    }

    /// Stops every timer and drops all speakers. Safe to call repeatedly.
    pub fn teardown(&mut self) -> Vec<u32> {
        self.closing = true;
        let mut ids = Vec::with_capacity(self.speakers.len());
        for (id, mut speaker) in self.speakers.drain() {
            speaker.stop();
            ids.push(id);
        }
        ids.sort_unstable();
        ids
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn speaker(&self, session_id: u32) -> Option<&SpeakerAudioState> {
        self.speakers.get(&session_id)
    }

    pub fn len(&self) -> usize {
        self.speakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{packet, FakeCodecs};
    use bytes::Bytes;

    fn frame(session_id: u32, sequence: u64, opus: Vec<u8>) -> AudioFrame {
        AudioFrame {
            session_id,
            sequence,
            last_packet: false,
            opus: Bytes::from(opus),
            position: None,
        }
    }

    fn pipeline() -> IngestPipeline {
        IngestPipeline::new(Arc::new(FakeCodecs), 5, 480)
    }

    #[test]
    fn empty_ring_drains_nothing() {
        let mut ring = JitterRing::new(5, 480);
        for _ in 0..10 {
            assert!(ring.drain().is_none());
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn ring_plays_packets_in_arrival_order() {
        let mut ring = JitterRing::new(5, 4);
        assert!(ring.push(&[1; 4]));
        assert!(ring.push(&[2; 8]));
        assert_eq!(ring.drain(), Some(&[1i16; 4][..]));
        assert_eq!(ring.drain(), Some(&[2i16; 4][..]));
        assert_eq!(ring.drain(), Some(&[2i16; 4][..]));
        assert_eq!(ring.drain(), None);
    }

    #[test]
    fn ring_never_yields_unwritten_frames() {
        let mut ring = JitterRing::new(5, 2);
        let mut played = Vec::new();
        for round in 0..20i16 {
            if round % 3 != 0 {
                ring.push(&[round, round]);
            }
            while let Some(f) = ring.drain() {
                played.push(f[0]);
            }
        }
        let written: Vec<i16> = (0..20).filter(|r| r % 3 != 0).collect();
        assert_eq!(played, written);
    }

    #[test]
    fn full_ring_drops_newest() {
        let mut ring = JitterRing::new(5, 2);
        for v in 0..5 {
            assert!(ring.push(&[v, v]));
        }
        assert!(ring.is_full());
        assert!(!ring.push(&[99, 99]));
        let drained: Vec<i16> = std::iter::from_fn(|| ring.drain().map(|f| f[0])).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn freed_slot_is_reused_after_wraparound() {
        let mut ring = JitterRing::new(5, 1);
        for v in 0..5 {
            ring.push(&[v]);
        }
        assert_eq!(ring.drain(), Some(&[0i16][..]));
        assert!(ring.push(&[5]));
        let drained: Vec<i16> = std::iter::from_fn(|| ring.drain().map(|f| f[0])).collect();
        assert_eq!(drained, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn short_tail_is_zero_padded() {
        let mut ring = JitterRing::new(5, 4);
        ring.push(&[7; 6]);
        assert_eq!(ring.drain(), Some(&[7i16; 4][..]));
        assert_eq!(ring.drain(), Some(&[7i16, 7, 0, 0][..]));
        assert!(ring.is_empty());
    }

    #[test]
    fn new_speakers_get_increasing_track_numbers() {
        let mut p = pipeline();
        assert_eq!(p.ensure_speaker(10).unwrap(), Some(1));
        assert_eq!(p.ensure_speaker(10).unwrap(), None);
        assert_eq!(p.ensure_speaker(4).unwrap(), Some(2));
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn ingest_then_drain_yields_decoded_audio() {
        let mut p = pipeline();
        assert_eq!(p.ingest(&frame(3, 0, packet(9, 960))).unwrap(), Ingested::Stored);
        assert_eq!(p.drain(3).unwrap(), &[9i16; 480][..]);
        assert_eq!(p.drain(3).unwrap(), &[9i16; 480][..]);
        assert!(p.drain(3).is_none());
        assert!(p.drain(99).is_none());
        assert_eq!(p.speaker(3).unwrap().last_sequence(), Some(0));
    }

    #[test]
    fn sixth_burst_packet_is_dropped() {
        let mut p = pipeline();
        for seq in 0..5 {
            assert_eq!(p.ingest(&frame(1, seq, packet(1, 480))).unwrap(), Ingested::Stored);
        }
        assert_eq!(p.ingest(&frame(1, 5, packet(1, 480))).unwrap(), Ingested::RingFull);
        let speaker = p.speaker(1).unwrap();
        assert_eq!(speaker.stored(), 5);
        assert_eq!(speaker.dropped(), 1);
    }

    #[test]
    fn decode_failure_drops_frame_only() {
        let mut p = pipeline();
        assert_eq!(p.ingest(&frame(1, 0, vec![0xFF, 0, 0])).unwrap(), Ingested::DecodeFailed);
        assert_eq!(p.ingest(&frame(1, 1, packet(2, 480))).unwrap(), Ingested::Stored);
        assert_eq!(p.drain(1).unwrap()[0], 2);
    }

    #[test]
    fn teardown_is_idempotent_and_blocks_ingest() {
        let mut p = pipeline();
        p.ingest(&frame(2, 0, packet(1, 480))).unwrap();
        p.ingest(&frame(1, 0, packet(1, 480))).unwrap();
        assert_eq!(p.teardown(), vec![1, 2]);
        assert!(p.teardown().is_empty());
        assert!(p.is_closing());
        assert_eq!(p.ingest(&frame(1, 1, packet(1, 480))).unwrap(), Ingested::Closing);
        assert_eq!(p.ensure_speaker(5).unwrap(), None);
        assert!(p.is_empty());
    }

    #[tokio::test]
    async fn timer_fires_until_speaker_removed() {
        let mut p = pipeline();
        p.ensure_speaker(8).unwrap();
        assert!(p.attach_timer(8, Duration::from_millis(5)));
        assert!(p.speaker(8).unwrap().has_live_timer());

        let id = futures::future::poll_fn(|cx| p.poll_drain(cx)).await;
        assert_eq!(id, 8);

        let removed = p.remove_speaker(8).unwrap();
        assert!(!removed.has_live_timer());
        let fired = tokio::time::timeout(
            Duration::from_millis(30),
            futures::future::poll_fn(|cx| p.poll_drain(cx)),
        )
        .await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn stopped_timer_never_fires() {
        let mut timer = DrainTimer::start(Duration::from_millis(1));
        timer.stop();
        let fired = tokio::time::timeout(
            Duration::from_millis(20),
            futures::future::poll_fn(|cx| timer.poll_fire(cx)),
        )
        .await;
        assert!(fired.is_err());
    }
}
