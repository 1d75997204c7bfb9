//! Wire protocol between the client and the voice peer
//!
//! One session per connection. Control tokens and tagged text travel as
//! text frames; utterances and synthesized speech travel as binary frames.

use crate::{Error, Result};

/// Client → peer: begin session
pub const START_TOKEN: &str = "__start__";

/// Both directions: end of an utterance or of a synthesized response
pub const END_TOKEN: &str = "__end__";

/// Peer → client: transcript of the last utterance
pub const TRANSCRIPT_PREFIX: &str = "TRANSCRIPT::";

/// Peer → client: dialogue reply text
pub const REPLY_PREFIX: &str = "REPLY::";

/// A frame on the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Messages sent by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Begin the session
    Start,
    /// One encoded utterance
    Utterance(Vec<u8>),
    /// Utterance boundary, sent right after the audio
    End,
}

impl From<ClientMessage> for Frame {
    fn from(message: ClientMessage) -> Self {
        match message {
            ClientMessage::Start => Self::Text(START_TOKEN.to_string()),
            ClientMessage::Utterance(bytes) => Self::Binary(bytes),
            ClientMessage::End => Self::Text(END_TOKEN.to_string()),
        }
    }
}

/// Messages received from the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// Recognized transcript of the utterance just sent
    Transcript(String),
    /// Dialogue reply text
    Reply(String),
    /// One fragment of synthesized speech
    Audio(Vec<u8>),
    /// End of the synthesized speech stream
    End,
}

impl PeerMessage {
    /// Parse a frame received from the peer
    ///
    /// Tagged text is trimmed of surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMessage`] for text frames with an unknown tag
    pub fn parse(frame: Frame) -> Result<Self> {
        match frame {
            Frame::Binary(bytes) => Ok(Self::Audio(bytes)),
            Frame::Text(text) => {
                if text == END_TOKEN {
                    Ok(Self::End)
                } else if let Some(rest) = text.strip_prefix(TRANSCRIPT_PREFIX) {
                    Ok(Self::Transcript(rest.trim().to_string()))
                } else if let Some(rest) = text.strip_prefix(REPLY_PREFIX) {
                    Ok(Self::Reply(rest.trim().to_string()))
                } else {
                    Err(Error::MalformedMessage(truncate(&text, 64)))
                }
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
