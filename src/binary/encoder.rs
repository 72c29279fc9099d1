//! Encoders for backend frames.

use super::{
    BinaryCursor, Position, AUDIO_FRAME_TYPE, AUDIO_HEADER_OPUS, FRAME_HEADER_LEN,
    OPUS_LENGTH_MASK, OPUS_TERMINATOR_BIT, POSITION_LEN,
};
use crate::error::CodecError;
use bytes::Bytes;

/// Wraps `payload` in a frame header of the given type.
pub fn encode_frame(kind: u16, payload: &[u8]) -> Result<Bytes, CodecError> {
    let length = u32::try_from(payload.len()).map_err(|_| CodecError::Bounds {
        offset: FRAME_HEADER_LEN,
        len: payload.len(),
        capacity: u32::MAX as usize,
    })?;
    let mut c = BinaryCursor::new(vec![0u8; FRAME_HEADER_LEN + payload.len()]);
    c.write_u16(kind)?;
    c.write_u32(length)?;
    c.write_bytes(payload)?;
    Ok(Bytes::from(c.into_inner()))
}

/// Builds an outbound voice frame. The backend infers the speaker from the
/// connection, so no session id is written.
pub fn encode_egress_audio(
    sequence: u64,
    opus: &[u8],
    position: Option<Position>,
) -> Result<Bytes, CodecError> {
    encode_audio(None, sequence, false, opus, position)
}

pub(super) fn encode_audio(
    session_id: Option<u32>,
    sequence: u64,
    last_packet: bool,
    opus: &[u8],
    position: Option<Position>,
) -> Result<Bytes, CodecError> {
    if opus.len() as u64 > OPUS_LENGTH_MASK {
        return Err(CodecError::OpusTooLarge(opus.len()));
    }
    let mut len_field = opus.len() as u64;
    if last_packet {
        len_field |= OPUS_TERMINATOR_BIT;
    }

    // header + type byte + up to three 4-byte varints + opus + position
    let capacity = FRAME_HEADER_LEN + 1 + 3 * 4 + opus.len() + POSITION_LEN;
    let mut c = BinaryCursor::new(vec![0u8; capacity]);
    c.write_u16(AUDIO_FRAME_TYPE)?;
    c.skip(4)?;
    c.write_u8(AUDIO_HEADER_OPUS)?;
    if let Some(id) = session_id {
        c.write_varint(id as u64)?;
    }
    c.write_varint(sequence)?;
    c.write_varint(len_field)?;
    c.write_bytes(opus)?;
    if let Some(pos) = position {
        for v in pos {
            c.write_f32(v)?;
        }
    }

    let end = c.position();
    c.write_uint_at(2, (end - FRAME_HEADER_LEN) as u64, 4)?;
    let mut buf = c.into_inner();
    buf.truncate(end);
    Ok(Bytes::from(buf))
}
