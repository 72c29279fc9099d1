//! Constants for the backend wire protocol.

/// Frame header: 2-byte type + 4-byte payload length.
pub const FRAME_HEADER_LEN: usize = 6;

/// Frame type carrying a tunnelled voice packet.
pub const AUDIO_FRAME_TYPE: u16 = 1;

/// Audio packet header: codec Opus (4 << 5), target 0 (normal talking).
pub const AUDIO_HEADER_OPUS: u8 = 0x80;

/// Bit in the Opus length varint marking the last packet of a transmission.
pub const OPUS_TERMINATOR_BIT: u64 = 0x2000;

/// Mask applied to the Opus length varint before use.
pub const OPUS_LENGTH_MASK: u64 = 0x1FFF;

/// Positional trailer: three 32-bit floats.
pub const POSITION_LEN: usize = 12;

/// Largest value the varint encoder produces (4-byte tier).
pub const VARINT_ENCODE_MAX: u64 = (1 << 28) - 1;

/// Largest accepted frame payload; anything bigger means the stream is misaligned.
pub const DEFAULT_MAX_FRAME_LEN: usize = 0x7F_FFFF;
