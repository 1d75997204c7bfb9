//! Turntalk - turn-taking voice client for a remote conversational peer
//!
//! This library provides the core functionality for the turntalk client:
//! - Microphone capture with per-block energy classification
//! - Silence-based utterance segmentation and WAV encoding
//! - A WebSocket transport to the peer
//! - A session that alternates listening and speaking turns
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  blocks   ┌──────────────┐  WAV + __end__  ┌──────────┐
//! │  Microphone  ├──────────►│   Session    ├────────────────►│   Peer   │
//! │  (analyzer)  │  handoff  │ (segmenter)  │◄────────────────┤ (ws://)  │
//! └──────────────┘           └──────┬───────┘  text + audio   └──────────┘
//!                                   │
//!                            ┌──────▼───────┐
//!                            │   Speaker    │
//!                            └──────────────┘
//! ```

pub mod config;
pub mod error;
pub mod session;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{Session, SessionConfig, SessionError, SessionEvent, SessionInput, SessionState};
