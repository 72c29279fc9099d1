use thiserror::Error;

/// Library result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while bridging a voice session.
#[derive(Error, Debug)]
pub enum Error {
    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    #[error("framer: {0}")]
    Framer(#[from] FramerError),

    #[error("audio: {0}")]
    Audio(#[from] AudioError),

    #[error("session: {0}")]
    Session(#[from] SessionError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Binary protocol errors (cursor bounds, varints, audio payload shape).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("out of bounds: {len} bytes at offset {offset} (buffer is {capacity} bytes)")]
    Bounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("unsupported integer width {0}")]
    Width(usize),

    #[error("unsupported varint prefix {0:#04x}")]
    VarintPrefix(u8),

    #[error("value {0} too large for varint encoding")]
    VarintTooLarge(u64),

    #[error("unexpected audio header {0:#04x}")]
    AudioHeader(u8),

    #[error("opus length mismatch: declared {declared}, {remaining} bytes remain")]
    OpusLength { declared: usize, remaining: usize },

    #[error("opus payload of {0} bytes exceeds the length field")]
    OpusTooLarge(usize),

    #[error("session id {0} out of range")]
    SessionId(u64),
}

impl CodecError {
    /// Whether the error means the stream can no longer be trusted.
    ///
    /// A varint prefix outside the decode table cannot be produced by a
    /// well-formed backend, so the session is torn down rather than the frame
    /// skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::VarintPrefix(_))
    }
}

/// Stream reassembly errors. All of them are fatal for the bridging session.
#[derive(Error, Debug)]
pub enum FramerError {
    #[error("frame length {len} exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("stream corruption: {0}")]
    Corruption(String),

    #[error("audio frame: {0}")]
    Codec(#[from] CodecError),
}

/// Audio encode/decode errors.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("codec init: {0}")]
    Init(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("capture chunk of {len} samples exceeds playout frame of {max}")]
    ChunkTooLarge { len: usize, max: usize },
}

/// Session lifecycle errors.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session input queue full")]
    QueueFull,

    #[error("session closed")]
    Closed,

    #[error("unknown session {0}")]
    Unknown(uuid::Uuid),
}
