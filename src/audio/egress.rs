//! Assembles captured PCM into fixed-size encoded voice frames.

use super::AudioEncoder;
use crate::binary::{encode_egress_audio, Position, VARINT_ENCODE_MAX};
use crate::error::AudioError;
use bytes::Bytes;

/// Collects capture chunks until one encoder frame is full, then emits a
/// complete backend voice frame.
pub struct EgressAggregator {
    encoder: Box<dyn AudioEncoder>,
    buffer: Vec<i16>,
    offset: usize,
    last_chunk: Option<usize>,
    max_chunk: usize,
    sequence: u64,
    position: Option<Position>,
    emitted: u64,
    discarded: u64,
}

impl std::fmt::Debug for EgressAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EgressAggregator")
            .field("frame_samples", &self.buffer.len())
            .field("offset", &self.offset)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl EgressAggregator {
    /// `frame_samples` is the encoder frame; capture chunks may not exceed
    /// `max_chunk` samples.
    pub fn new(
        encoder: Box<dyn AudioEncoder>,
        frame_samples: usize,
        max_chunk: usize,
        send_position: bool,
    ) -> Self {
        Self {
            encoder,
            buffer: vec![0; frame_samples],
            offset: 0,
            last_chunk: None,
            max_chunk,
            sequence: 0,
            position: send_position.then_some([0.0; 3]),
            emitted: 0,
            discarded: 0,
        }
    }

    /// Sequence number the next emitted frame will carry. Wraps to 0 after
    /// the largest encodable varint.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn buffered(&self) -> usize {
        self.offset
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Appends one capture chunk. Returns a finished frame once exactly one
    /// encoder frame of samples has accumulated.
    pub fn push(&mut self, samples: &[i16]) -> crate::Result<Option<Bytes>> {
        let len = samples.len();
        if len == 0 {
            return Ok(None);
        }
        if len > self.max_chunk {
            return Err(AudioError::ChunkTooLarge {
                len,
                max: self.max_chunk,
            }
            .into());
        }

        if self.last_chunk != Some(len) {
            // Keep the fill level a multiple of the chunk size so the frame
            // boundary is reachable again.
            let old = self.offset;
            self.offset = old / len * len;
            tracing::debug!(
                from = ?self.last_chunk,
                to = len,
                offset_before = old,
                offset_after = self.offset,
                "capture chunk size changed"
            );
            self.last_chunk = Some(len);
        }

        let frame_samples = self.buffer.len();
        if self.offset + len > frame_samples {
            tracing::warn!(
                buffered = self.offset,
                incoming = len,
                frame_samples,
                "capture overran encoder frame, discarding"
            );
            self.offset = 0;
            self.discarded += 1;
            return Ok(None);
        }

        self.buffer[self.offset..self.offset + len].copy_from_slice(samples);
        self.offset += len;
        if self.offset < frame_samples {
            return Ok(None);
        }

        self.offset = 0;
        let opus = self.encoder.encode(&self.buffer)?;
        let frame = encode_egress_audio(self.sequence, &opus, self.position)?;
        // The encoder's varint tops out at 2^28 - 1; wrap rather than fail.
        self.sequence = if self.sequence >= VARINT_ENCODE_MAX {
            0
        } else {
            self.sequence + 1
        };
        self.emitted += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::FakeEncoder;
    use crate::binary::{BinaryCursor, FrameHeader, AUDIO_HEADER_OPUS, FRAME_HEADER_LEN};

    fn aggregator(frame_samples: usize) -> EgressAggregator {
        EgressAggregator::new(Box::new(FakeEncoder), frame_samples, 480, false)
    }

    /// Returns (sequence, encoded frame length reported by the fake encoder).
    fn parse(frame: &[u8]) -> (u64, usize) {
        let header = FrameHeader::parse(frame).unwrap();
        assert!(header.is_audio());
        assert_eq!(header.length as usize, frame.len() - FRAME_HEADER_LEN);
        let mut c = BinaryCursor::with_offset(frame, FRAME_HEADER_LEN).unwrap();
        assert_eq!(c.read_u8().unwrap(), AUDIO_HEADER_OPUS);
        let sequence = c.read_varint().unwrap();
        let opus_len = c.read_varint().unwrap() as usize;
        let opus = c.read_bytes(opus_len).unwrap().to_vec();
        assert_eq!(c.remaining(), 0);
        (sequence, u16::from_be_bytes([opus[0], opus[1]]) as usize)
    }

    #[test]
    fn one_frame_per_full_buffer_with_contiguous_sequence() {
        let mut agg = aggregator(480);
        let mut sequences = Vec::new();
        for _ in 0..6 {
            let frame = agg.push(&[1; 480]).unwrap().expect("frame per push");
            let (seq, samples) = parse(&frame);
            assert_eq!(samples, 480);
            sequences.push(seq);
        }
        assert_eq!(sequences, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(agg.sequence(), 6);
    }

    #[test]
    fn larger_frames_need_several_chunks() {
        let mut agg = aggregator(1920);
        let mut frames = Vec::new();
        for i in 0..12 {
            match agg.push(&[2; 480]).unwrap() {
                Some(frame) => frames.push((i, parse(&frame))),
                None => assert!(agg.buffered() > 0),
            }
        }
        assert_eq!(frames, vec![(3, (0, 1920)), (7, (1, 1920)), (11, (2, 1920))]);
    }

    #[test]
    fn size_change_truncates_to_new_multiple() {
        let mut agg = aggregator(480);
        for _ in 0..4 {
            assert!(agg.push(&[3; 100]).unwrap().is_none());
        }
        assert_eq!(agg.buffered(), 400);
        // 400 is already a multiple of 80, so one more chunk completes the frame.
        let frame = agg.push(&[3; 80]).unwrap().expect("frame");
        assert_eq!(parse(&frame), (0, 480));

        assert!(agg.push(&[3; 160]).unwrap().is_none());
        assert!(agg.push(&[3; 160]).unwrap().is_none());
        assert_eq!(agg.buffered(), 320);
        assert!(agg.push(&[3; 128]).unwrap().is_none());
        assert_eq!(agg.buffered(), 256 + 128);
    }

    #[test]
    fn overflow_discards_without_emitting() {
        let mut agg = aggregator(480);
        assert!(agg.push(&[4; 300]).unwrap().is_none());
        assert!(agg.push(&[4; 300]).unwrap().is_none());
        assert_eq!(agg.buffered(), 0);
        assert_eq!(agg.discarded(), 1);
        assert_eq!(agg.emitted(), 0);
        assert_eq!(agg.sequence(), 0);
    }

    #[test]
    fn oversized_chunk_is_rejected() {
        let mut agg = aggregator(480);
        let err = agg.push(&[0; 481]).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Audio(AudioError::ChunkTooLarge { len: 481, max: 480 })
        ));
        assert_eq!(agg.buffered(), 0);
    }

    #[test]
    fn position_placeholder_is_appended() {
        let mut agg = EgressAggregator::new(Box::new(FakeEncoder), 480, 480, true);
        let frame = agg.push(&[5; 480]).unwrap().unwrap();
        assert_eq!(&frame[frame.len() - 12..], &[0u8; 12]);
    }

    #[test]
    fn sequence_wraps_at_largest_encodable_value() {
        let mut agg = aggregator(480);
        agg.sequence = VARINT_ENCODE_MAX;
        let frame = agg.push(&[6; 480]).unwrap().expect("frame at the limit");
        assert_eq!(parse(&frame), (VARINT_ENCODE_MAX, 480));
        assert_eq!(agg.sequence(), 0);
        let frame = agg.push(&[6; 480]).unwrap().expect("frame after wrap");
        assert_eq!(parse(&frame), (0, 480));
        assert_eq!(agg.emitted(), 2);
    }
}
