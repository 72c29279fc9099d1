//! Decoder for voice frame payloads.

use super::{
    AudioFrame, BinaryCursor, AUDIO_HEADER_OPUS, OPUS_LENGTH_MASK, OPUS_TERMINATOR_BIT,
    POSITION_LEN,
};
use crate::error::CodecError;
use bytes::Bytes;

pub(super) fn decode_audio(payload: &[u8]) -> Result<AudioFrame, CodecError> {
    let mut c = BinaryCursor::new(payload);

    let header = c.read_u8()?;
    if header != AUDIO_HEADER_OPUS {
        return Err(CodecError::AudioHeader(header));
    }
    let session = c.read_varint()?;
    let session_id = u32::try_from(session).map_err(|_| CodecError::SessionId(session))?;
    let sequence = c.read_varint()?;

    let raw_len = c.read_varint()?;
    let last_packet = raw_len & OPUS_TERMINATOR_BIT != 0;
    let opus_len = (raw_len & OPUS_LENGTH_MASK) as usize;

    // Exactly the Opus bytes, or the Opus bytes plus a positional trailer.
    let remaining = c.remaining();
    if remaining != opus_len && remaining != opus_len + POSITION_LEN {
        return Err(CodecError::OpusLength {
            declared: opus_len,
            remaining,
        });
    }
    let opus = Bytes::copy_from_slice(c.read_bytes(opus_len)?);

    let position = if c.remaining() == POSITION_LEN {
        Some([c.read_f32()?, c.read_f32()?, c.read_f32()?])
    } else {
        None
    };

    Ok(AudioFrame {
        session_id,
        sequence,
        last_packet,
        opus,
        position,
    })
}
