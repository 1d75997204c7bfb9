//! Error types for turntalk

use thiserror::Error;

/// Result type alias for turntalk operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio error (encoding, decoding, device setup)
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone missing or access denied
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// Playback error
    #[error("playback error: {0}")]
    Playback(String),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(String),

    /// Transport closed by the peer or the network
    #[error("transport closed")]
    TransportClosed,

    /// Peer message the protocol does not define
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Session used out of order
    #[error("session error: {0}")]
    Session(String),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV container error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}
