//! Reassembly of backend frames from arbitrarily chunked socket reads.
//!
//! Voice frames are pulled out and decoded; every other byte is handed back
//! untouched so the peer sees exactly the framing the backend produced.

use crate::binary::{AudioFrame, FrameHeader, DEFAULT_MAX_FRAME_LEN, FRAME_HEADER_LEN};
use crate::error::FramerError;
use bytes::{Bytes, BytesMut};

/// One item produced by [`StreamFramer::feed`].
#[derive(Clone, Debug, PartialEq)]
pub enum FramerOutput {
    Audio(AudioFrame),
    /// Contiguous non-voice bytes, forwarded verbatim.
    Passthrough(Bytes),
}

/// State carried between two chunks.
#[derive(Debug, Default)]
pub enum ReassemblyState {
    #[default]
    Idle,
    /// Fewer than 6 bytes were left to read a header.
    Header(BytesMut),
    /// A voice frame whose payload is still incomplete; `buf` holds the header
    /// and the payload bytes received so far.
    Audio { buf: BytesMut, total: usize },
    /// Bytes of a non-voice frame still owed by the next chunk(s).
    Tail(usize),
}

/// Counters for logging and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FramerStats {
    pub audio_frames: u64,
    pub dropped_frames: u64,
    pub passthrough_bytes: u64,
}

/// Turns a chunked byte stream into voice frames and pass-through bytes.
#[derive(Debug)]
pub struct StreamFramer {
    state: ReassemblyState,
    max_frame_len: usize,
    stats: FramerStats,
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl StreamFramer {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            state: ReassemblyState::Idle,
            max_frame_len,
            stats: FramerStats::default(),
        }
    }

    pub fn state(&self) -> &ReassemblyState {
        &self.state
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    /// Consumes one chunk and returns what became complete, in stream order.
    ///
    /// Errors are fatal: the stream is misaligned and the session must close.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<FramerOutput>, FramerError> {
        let mut out = Vec::new();

        let joined;
        let mut tail = 0;
        let data: &[u8] = match std::mem::take(&mut self.state) {
            ReassemblyState::Header(mut head) => {
                head.extend_from_slice(chunk);
                joined = head;
                &joined[..]
            }
            ReassemblyState::Audio { mut buf, total } => {
                let take = (total - buf.len()).min(chunk.len());
                buf.extend_from_slice(&chunk[..take]);
                if buf.len() < total {
                    self.state = ReassemblyState::Audio { buf, total };
                    return Ok(out);
                }
                self.emit_audio(&buf[FRAME_HEADER_LEN..], &mut out)?;
                &chunk[take..]
            }
            ReassemblyState::Tail(owed) => {
                if chunk.len() < owed {
                    self.pass(chunk, &mut out);
                    self.state = ReassemblyState::Tail(owed - chunk.len());
                    return Ok(out);
                }
                // The tail joins whatever pass-through bytes follow it.
                tail = owed;
                chunk
            }
            ReassemblyState::Idle => chunk,
        };

        self.parse(data, tail, &mut out)?;
        Ok(out)
    }

    /// Parses frames starting at `start`; bytes before it are already known
    /// to be pass-through.
    fn parse(
        &mut self,
        data: &[u8],
        start: usize,
        out: &mut Vec<FramerOutput>,
    ) -> Result<(), FramerError> {
        // Pass-through bytes run from `pass_start` to `pos`.
        let mut pos = start;
        let mut pass_start = 0;

        loop {
            let remaining = data.len() - pos;
            if remaining < FRAME_HEADER_LEN {
                self.pass(&data[pass_start..pos], out);
                if remaining > 0 {
                    self.state = ReassemblyState::Header(BytesMut::from(&data[pos..]));
                }
                return Ok(());
            }

            let header = FrameHeader::parse(&data[pos..])?;
            let length = header.length as usize;
            if length > self.max_frame_len {
                return Err(FramerError::FrameTooLarge {
                    len: length,
                    max: self.max_frame_len,
                });
            }
            let end = pos
                .checked_add(FRAME_HEADER_LEN)
                .and_then(|p| p.checked_add(length))
                .ok_or_else(|| {
                    FramerError::Corruption(format!("frame end overflows at offset {pos}"))
                })?;

            if header.is_audio() {
                self.pass(&data[pass_start..pos], out);
                if end > data.len() {
                    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + length);
                    buf.extend_from_slice(&data[pos..]);
                    self.state = ReassemblyState::Audio {
                        buf,
                        total: FRAME_HEADER_LEN + length,
                    };
                    return Ok(());
                }
                self.emit_audio(&data[pos + FRAME_HEADER_LEN..end], out)?;
                pos = end;
                pass_start = pos;
            } else if end <= data.len() {
                pos = end;
            } else {
                self.pass(&data[pass_start..], out);
                let owed = end.checked_sub(data.len()).ok_or_else(|| {
                    FramerError::Corruption(format!("negative tail at offset {pos}"))
                })?;
                self.state = ReassemblyState::Tail(owed);
                return Ok(());
            }
        }
    }

    fn emit_audio(&mut self, payload: &[u8], out: &mut Vec<FramerOutput>) -> Result<(), FramerError> {
        match AudioFrame::decode(payload) {
            Ok(frame) => {
                self.stats.audio_frames += 1;
                out.push(FramerOutput::Audio(frame));
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                self.stats.dropped_frames += 1;
                tracing::warn!(error = %e, len = payload.len(), "dropping malformed audio frame");
                Ok(())
            }
        }
    }

    fn pass(&mut self, bytes: &[u8], out: &mut Vec<FramerOutput>) {
        if bytes.is_empty() {
            return;
        }
        self.stats.passthrough_bytes += bytes.len() as u64;
        out.push(FramerOutput::Passthrough(Bytes::copy_from_slice(bytes)));
    }
}
