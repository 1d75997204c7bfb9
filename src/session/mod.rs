//! Turn-taking voice session
//!
//! A [`Session`] owns the transport, the microphone and the speaker and
//! sequences them so the user and the peer take turns: capture is armed
//! only while listening, response audio is gathered until the peer's
//! end-of-response marker and then played, and listening resumes once
//! playback finishes.

mod event;

use std::future::pending;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use event::{SessionError, SessionEvent, SessionState};

use crate::transport::{ClientMessage, Connector, Frame, PeerMessage, Transport};
use crate::voice::{
    AnalyzedBlock, AudioAsset, CaptureEvent, CaptureSource, EnergyMeasure, Handoff, Player,
    Segmenter, SilenceCutoffPolicy, Utterance, encode_wav, handoff,
};
use crate::voice::analyzer::{DEFAULT_HANDOFF_CAPACITY, DEFAULT_SILENCE_THRESHOLD};
use crate::{Error, Result};

/// Tuning for block classification and utterance segmentation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Energy above which a block counts as voiced
    pub silence_threshold: f32,
    pub energy_measure: EnergyMeasure,
    /// When trailing silence finalizes an utterance
    pub cutoff: SilenceCutoffPolicy,
    /// Capacity of the capture → session queue
    pub handoff_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            energy_measure: EnergyMeasure::default(),
            cutoff: SilenceCutoffPolicy::default(),
            handoff_capacity: DEFAULT_HANDOFF_CAPACITY,
        }
    }
}

/// One input to the session, in the order it was observed
#[derive(Debug)]
pub enum SessionInput {
    /// Capture event, or `None` when the capture stream ended
    Capture(Option<CaptureEvent>),
    /// Peer frame, or `None` when the transport closed
    Peer(Option<Result<Frame>>),
    /// Playback of the current response finished
    PlaybackFinished(Result<()>),
    /// User asked to stop
    Shutdown,
}

/// A voice conversation with a remote peer
pub struct Session<C: Connector, S: CaptureSource, P: Player> {
    id: Uuid,
    config: SessionConfig,
    state: SessionState,
    connector: C,
    transport: Option<C::Transport>,
    capture: S,
    handoff: Option<Handoff>,
    segmenter: Segmenter,
    player: P,
    playback: Option<BoxFuture<'static, Result<()>>>,
    response_fragments: Vec<Vec<u8>>,
    reply: Option<String>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl<C: Connector, S: CaptureSource, P: Player> Session<C, S, P> {
    /// Create an idle session and the receiver for its events
    #[must_use]
    pub fn new(
        config: SessionConfig,
        connector: C,
        capture: S,
        player: P,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();

        let session = Self {
            id: Uuid::new_v4(),
            config,
            state: SessionState::Idle,
            connector,
            transport: None,
            capture,
            handoff: None,
            segmenter: Segmenter::new(config.cutoff),
            player,
            playback: None,
            response_fragments: Vec::new(),
            reply: None,
            events,
        };

        (session, events_rx)
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn segmenter(&self) -> &Segmenter {
        &self.segmenter
    }

    /// Response audio fragments received so far in the current turn
    #[must_use]
    pub fn pending_fragments(&self) -> usize {
        self.response_fragments.len()
    }

    /// Reply text of the response in progress
    #[must_use]
    pub fn reply(&self) -> Option<&str> {
        self.reply.as_deref()
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Open the transport, announce the session and start listening
    ///
    /// # Errors
    ///
    /// Returns an error if the session is already running, the transport
    /// cannot be opened, or the microphone cannot be armed
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::Session(format!("session already {}", self.state)));
        }

        tracing::info!(session_id = %self.id, "starting session");

        let mut transport = match self.connector.connect().await {
            Ok(transport) => transport,
            Err(e) => {
                self.emit(SessionError::Transport(e.to_string()).into());
                return Err(e);
            }
        };

        if let Err(e) = transport.send(ClientMessage::Start.into()).await {
            self.emit(SessionError::Transport(e.to_string()).into());
            return Err(e);
        }
        self.transport = Some(transport);

        if let Err(e) = self.arm_capture() {
            self.emit(SessionError::CaptureUnavailable(e.to_string()).into());
            self.teardown(true).await;
            return Err(e);
        }

        self.state = SessionState::Listening;
        self.emit(SessionEvent::ReadyToListen);
        Ok(())
    }

    /// Close the transport and release every device
    ///
    /// Stopping an idle session does nothing.
    pub async fn stop(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        tracing::info!(session_id = %self.id, state = %self.state, "stopping session");
        self.teardown(true).await;
    }

    /// Run the session until it stops or `shutdown` fires
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be started
    pub async fn run(&mut self, shutdown: &mut mpsc::Receiver<()>) -> Result<()> {
        self.start().await?;

        while self.state != SessionState::Idle {
            let input = self.next_input(shutdown).await;
            self.handle(input).await;
        }

        tracing::info!(session_id = %self.id, "session ended");
        Ok(())
    }

    /// Wait for the next input from capture, transport, playback or shutdown
    pub async fn next_input(&mut self, shutdown: &mut mpsc::Receiver<()>) -> SessionInput {
        let Self {
            transport,
            handoff,
            playback,
            ..
        } = self;

        tokio::select! {
            _ = shutdown.recv() => SessionInput::Shutdown,
            event = next_capture(handoff.as_mut()) => SessionInput::Capture(event),
            frame = next_frame(transport.as_mut()) => SessionInput::Peer(frame),
            result = next_playback(playback.as_mut()) => SessionInput::PlaybackFinished(result),
        }
    }

    /// Apply one input to the session
    pub async fn handle(&mut self, input: SessionInput) {
        match input {
            SessionInput::Shutdown => {
                tracing::info!("shutdown requested");
                self.stop().await;
            }
            SessionInput::Capture(Some(CaptureEvent::Block(block))) => {
                self.on_block(&block).await;
            }
            SessionInput::Capture(Some(CaptureEvent::Fault(message))) => {
                tracing::warn!(error = %message, "capture fault");
                self.emit(SessionError::Capture(message).into());
            }
            SessionInput::Capture(None) => {
                if self.state == SessionState::Listening {
                    tracing::error!("capture stream ended while listening");
                    self.fail(SessionError::CaptureUnavailable(
                        "capture stream ended".to_string(),
                    ))
                    .await;
                } else {
                    self.handoff = None;
                }
            }
            SessionInput::Peer(None) => {
                tracing::warn!("transport closed by peer");
                self.fail(SessionError::TransportClosed).await;
            }
            SessionInput::Peer(Some(Err(e))) => {
                tracing::error!(error = %e, "transport failed");
                self.fail(SessionError::Transport(e.to_string())).await;
            }
            SessionInput::Peer(Some(Ok(frame))) => self.on_frame(frame).await,
            SessionInput::PlaybackFinished(result) => {
                self.playback = None;
                self.on_playback_finished(result).await;
            }
        }
    }

    async fn on_block(&mut self, block: &AnalyzedBlock) {
        if self.state != SessionState::Listening {
            tracing::debug!(state = %self.state, "dropping block outside listening turn");
            return;
        }

        if let Some(dropped) = self
            .handoff
            .as_ref()
            .map(Handoff::take_dropped)
            .filter(|&n| n > 0)
        {
            tracing::warn!(dropped, "capture queue overflowed, blocks dropped");
        }

        if let Some(utterance) = self
            .segmenter
            .feed(&block.samples, block.class, block.captured_at)
        {
            self.on_utterance(&utterance).await;
        }
    }

    async fn on_utterance(&mut self, utterance: &Utterance) {
        if self.state != SessionState::Listening {
            tracing::warn!(state = %self.state, "utterance finalized while a response is pending, dropping");
            return;
        }

        self.disarm_capture();

        let wav = match encode_wav(&utterance.samples, self.capture.sample_rate()) {
            Ok(wav) => wav,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode utterance");
                self.resume_listening().await;
                return;
            }
        };

        let event = SessionEvent::UtteranceReady {
            blocks: utterance.blocks,
            samples: wav.sample_count(),
            bytes: wav.as_bytes().len(),
            duration_ms: wav.duration_ms(),
        };

        tracing::info!(
            blocks = utterance.blocks,
            duration_ms = wav.duration_ms(),
            "utterance finalized"
        );

        self.state = SessionState::AwaitingResponse;

        for message in [ClientMessage::Utterance(wav.into_bytes()), ClientMessage::End] {
            if let Err(e) = self.send(message).await {
                tracing::error!(error = %e, "failed to send utterance");
                let error = match e {
                    Error::TransportClosed => SessionError::TransportClosed,
                    other => SessionError::Transport(other.to_string()),
                };
                self.fail(error).await;
                return;
            }
        }

        self.emit(event);
    }

    async fn on_frame(&mut self, frame: Frame) {
        let message = match PeerMessage::parse(frame) {
            Ok(message) => message,
            Err(e) => {
                let error = match e {
                    Error::MalformedMessage(detail) => SessionError::MalformedMessage(detail),
                    other => SessionError::Transport(other.to_string()),
                };
                tracing::warn!(%error, "dropping peer message");
                return;
            }
        };

        match (self.state, message) {
            (SessionState::Idle, _) => {
                tracing::debug!("peer message while idle, dropping");
            }
            (SessionState::Listening, PeerMessage::End) => {
                tracing::warn!("end-of-response with no response pending, dropping");
            }
            (SessionState::Listening, message) => {
                // Peer speaks first, e.g. a greeting
                tracing::info!("peer opened a response turn");
                self.disarm_capture();
                self.state = SessionState::AwaitingResponse;
                self.on_response_message(message).await;
            }
            (SessionState::AwaitingResponse, message) => {
                self.on_response_message(message).await;
            }
            (SessionState::Speaking, message) => {
                tracing::debug!(?message, "peer message while speaking, dropping");
            }
        }
    }

    async fn on_response_message(&mut self, message: PeerMessage) {
        match message {
            PeerMessage::Transcript(text) => {
                tracing::info!(%text, "transcript received");
                self.emit(SessionEvent::TranscriptReceived { text });
            }
            PeerMessage::Reply(text) => {
                tracing::info!(%text, "reply received");
                self.reply = Some(text.clone());
                self.emit(SessionEvent::ReplyReceived { text });
            }
            PeerMessage::Audio(bytes) => {
                tracing::trace!(len = bytes.len(), "response audio fragment");
                self.response_fragments.push(bytes);
            }
            PeerMessage::End => self.begin_speaking().await,
        }
    }

    async fn begin_speaking(&mut self) {
        let asset = AudioAsset::from_fragments(&std::mem::take(&mut self.response_fragments));

        tracing::info!(bytes = asset.len(), "response complete");
        self.emit(SessionEvent::ResponseComplete { bytes: asset.len() });

        if asset.is_empty() {
            tracing::warn!("response carried no audio");
            self.resume_listening().await;
            return;
        }

        self.state = SessionState::Speaking;
        self.playback = Some(self.player.play(asset));
    }

    async fn on_playback_finished(&mut self, result: Result<()>) {
        if self.state != SessionState::Speaking {
            return;
        }

        if let Err(e) = result {
            tracing::error!(error = %e, "playback failed");
            self.emit(SessionError::PlaybackFailure(e.to_string()).into());
        }

        self.resume_listening().await;
    }

    async fn resume_listening(&mut self) {
        self.response_fragments.clear();
        self.reply = None;

        match self.arm_capture() {
            Ok(()) => {
                self.state = SessionState::Listening;
                self.emit(SessionEvent::ReadyToListen);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to re-arm capture");
                self.fail(SessionError::CaptureUnavailable(e.to_string()))
                    .await;
            }
        }
    }

    /// Fresh handoff per listening turn so nothing from an earlier arm leaks in
    fn arm_capture(&mut self) -> Result<()> {
        let (analyzer, handoff) = handoff(
            self.config.handoff_capacity,
            self.config.energy_measure,
            self.config.silence_threshold,
        );
        self.segmenter.discard();
        self.capture.arm(analyzer)?;
        self.handoff = Some(handoff);
        tracing::debug!("capture armed");
        Ok(())
    }

    fn disarm_capture(&mut self) {
        self.capture.disarm();
        self.handoff = None;
        self.segmenter.discard();
        tracing::debug!("capture disarmed");
    }

    async fn send(&mut self, message: ClientMessage) -> Result<()> {
        match self.transport.as_mut() {
            Some(transport) => transport.send(message.into()).await,
            None => Err(Error::TransportClosed),
        }
    }

    /// Tear down and surface `error` once; later failures on an idle session are ignored
    async fn fail(&mut self, error: SessionError) {
        if self.state == SessionState::Idle {
            return;
        }
        let graceful = !matches!(error, SessionError::TransportClosed);
        self.teardown(graceful).await;
        self.emit(error.into());
    }

    async fn teardown(&mut self, close_transport: bool) {
        self.disarm_capture();
        self.player.stop();
        self.playback = None;
        self.response_fragments.clear();
        self.reply = None;

        if let Some(mut transport) = self.transport.take()
            && close_transport
            && let Err(e) = transport.close().await
        {
            tracing::debug!(error = %e, "transport close failed");
        }

        self.state = SessionState::Idle;
    }

    fn emit(&self, event: SessionEvent) {
        // Receiver may be gone during shutdown
        let _ = self.events.send(event);
    }
}

async fn next_capture(handoff: Option<&mut Handoff>) -> Option<CaptureEvent> {
    match handoff {
        Some(handoff) => handoff.recv().await,
        None => pending().await,
    }
}

async fn next_frame<T: Transport>(transport: Option<&mut T>) -> Option<Result<Frame>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => pending().await,
    }
}

async fn next_playback(playback: Option<&mut BoxFuture<'static, Result<()>>>) -> Result<()> {
    match playback {
        Some(playback) => playback.await,
        None => pending().await,
    }
}
