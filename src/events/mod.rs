//! Event types emitted by a bridging session.

use uuid::Uuid;

/// Events emitted by a [BridgeSession](crate::session::BridgeSession) to the
/// signaling layer.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// The session loop is running against the backend; the browser may start
    /// talking to the server over the data channel.
    BackendConnected { connection: Uuid },

    /// A remote speaker got a playout track. The browser uses `track_num` to
    /// match the incoming track to the user.
    SpeakerAdded {
        connection: Uuid,
        session_id: u32,
        track_num: u32,
    },

    /// A remote speaker's track was released.
    SpeakerRemoved { connection: Uuid, session_id: u32 },

    /// The session ended.
    Closed { connection: Uuid, reason: CloseReason },
}

/// Why a bridging session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The backend closed the connection.
    BackendClosed,

    /// Reading from or writing to the backend failed.
    BackendError(String),

    /// The backend stream could not be reframed.
    Corruption(String),

    /// Stop was requested through the session handle.
    Stopped,

    /// Every session handle was dropped.
    InputsDropped,
}

impl CloseReason {
    /// Whether the session ended because something went wrong.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::BackendError(_) | Self::Corruption(_))
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BackendClosed => write!(f, "backend closed the connection"),
            Self::BackendError(e) => write!(f, "backend error: {e}"),
            Self::Corruption(e) => write!(f, "stream corruption: {e}"),
            Self::Stopped => write!(f, "stopped"),
            Self::InputsDropped => write!(f, "all handles dropped"),
        }
    }
}
