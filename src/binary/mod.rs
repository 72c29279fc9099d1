//! Backend wire protocol: length-prefixed frames over TCP.
//!
//! Every message is `[type:u16][length:u32][payload]`, big-endian. Only
//! voice frames (type 1) are decoded; everything else travels as opaque bytes.

mod consts;
mod cursor;
mod decoder;
mod encoder;

pub use consts::*;
pub use cursor::{varint_len, BinaryCursor};
pub use encoder::{encode_egress_audio, encode_frame};

use bytes::Bytes;

/// Fixed-size frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: u16,
    /// Payload length, excluding the header itself.
    pub length: u32,
}

impl FrameHeader {
    /// Parses a header from the first [`FRAME_HEADER_LEN`] bytes of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, crate::error::CodecError> {
        let mut c = BinaryCursor::new(data);
        Ok(Self {
            kind: c.read_u16()?,
            length: c.read_u32()?,
        })
    }

    pub fn is_audio(&self) -> bool {
        self.kind == AUDIO_FRAME_TYPE
    }
}

/// Listener position attached to a voice packet.
pub type Position = [f32; 3];

/// A decoded voice packet (payload of a type-1 frame).
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    /// Backend session id of the speaker.
    pub session_id: u32,
    pub sequence: u64,
    /// Set when the speaker stopped transmitting after this packet.
    pub last_packet: bool,
    pub opus: Bytes,
    pub position: Option<Position>,
}

impl AudioFrame {
    /// Decodes a voice frame payload (the bytes after the 6-byte header).
    pub fn decode(payload: &[u8]) -> Result<Self, crate::error::CodecError> {
        decoder::decode_audio(payload)
    }

    /// Encodes the frame as the backend sends it, header included.
    pub fn to_bytes(&self) -> Result<Bytes, crate::error::CodecError> {
        encoder::encode_audio(
            Some(self.session_id),
            self.sequence,
            self.last_packet,
            &self.opus,
            self.position,
        )
    }
}
