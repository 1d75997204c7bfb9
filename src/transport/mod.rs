//! Transport channel to the remote voice peer
//!
//! The session only sees [`Connector`] and [`Transport`]; production
//! uses [`WsConnector`].

mod protocol;
mod ws;

use async_trait::async_trait;

pub use protocol::{
    ClientMessage, END_TOKEN, Frame, PeerMessage, REPLY_PREFIX, START_TOKEN, TRANSCRIPT_PREFIX,
};
pub use ws::{WsConnector, WsTransport};

use crate::Result;

/// A bidirectional, message-oriented connection
#[async_trait]
pub trait Transport: Send {
    /// Send one frame
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TransportClosed`] once the connection is gone
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Receive the next frame in arrival order
    ///
    /// Returns `None` once the connection has closed.
    async fn recv(&mut self) -> Option<Result<Frame>>;

    /// Close the connection
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails
    async fn close(&mut self) -> Result<()>;
}

/// Opens transports
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;

    /// Open a new connection
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Transport`] if the peer cannot be reached
    async fn connect(&self) -> Result<Self::Transport>;
}
