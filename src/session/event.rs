//! Session states and the events surfaced to the console

use serde::Serialize;

/// Where the conversation currently stands
///
/// Exactly one state holds at a time. Capture is armed only while
/// [`SessionState::Listening`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No transport, nothing armed
    #[default]
    Idle,
    /// Capture armed, segmenter active
    Listening,
    /// Utterance sent, accumulating the peer's response
    AwaitingResponse,
    /// Response audio playing
    Speaking,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::AwaitingResponse => write!(f, "awaiting response"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// Failures surfaced to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SessionError {
    /// Microphone missing, access denied, or its stream ended
    #[error("microphone unavailable: {0}")]
    CaptureUnavailable(String),

    /// Device fault reported while capturing
    #[error("capture fault: {0}")]
    Capture(String),

    /// Peer or network closed the connection
    #[error("connection closed")]
    TransportClosed,

    /// Connection could not be opened or failed mid-session
    #[error("connection error: {0}")]
    Transport(String),

    /// Peer sent a message the protocol does not define; logged, never fatal
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Response audio could not be played
    #[error("playback failed: {0}")]
    PlaybackFailure(String),
}

/// Observable session events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Capture armed, the user may speak
    ReadyToListen,

    /// An utterance was finalized and sent to the peer
    UtteranceReady {
        blocks: usize,
        samples: usize,
        bytes: usize,
        duration_ms: u64,
    },

    /// The peer recognized the user's speech
    TranscriptReceived { text: String },

    /// The peer's reply text
    ReplyReceived { text: String },

    /// The peer finished streaming response audio
    ResponseComplete { bytes: usize },

    Error { error: SessionError },
}

impl From<SessionError> for SessionEvent {
    fn from(error: SessionError) -> Self {
        Self::Error { error }
    }
}
