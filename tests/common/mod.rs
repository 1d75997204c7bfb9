//! Shared test utilities
//!
//! Signal generators and in-memory stand-ins for the microphone, the
//! speaker and the peer connection.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use turntalk::transport::{Connector, Frame, Transport};
use turntalk::voice::{AudioAsset, CaptureSource, FrameAnalyzer, Player};
use turntalk::{Error, Result, SessionEvent};

/// Sample rate reported by [`FakeCapture`]
pub const TEST_SAMPLE_RATE: u32 = 16_000;

/// Block size used by the session tests
pub const TEST_BLOCK_SIZE: usize = 256;

/// Generate sine wave audio samples
#[allow(clippy::cast_precision_loss)]
pub fn generate_sine(frequency: f32, num_samples: usize, amplitude: f32) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / TEST_SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
pub fn generate_silence(num_samples: usize) -> Vec<f32> {
    vec![0.0; num_samples]
}

/// One block that clears the default threshold
pub fn voiced_block() -> Vec<f32> {
    generate_sine(440.0, TEST_BLOCK_SIZE, 0.5)
}

/// One block well under the default threshold
pub fn silent_block() -> Vec<f32> {
    generate_silence(TEST_BLOCK_SIZE)
}

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MicState {
    analyzer: Option<FrameAnalyzer>,
    arms: usize,
    fail_arm: bool,
}

/// Capture source driven by the test through a [`MicHandle`]
pub struct FakeCapture {
    state: Arc<Mutex<MicState>>,
}

/// Test-side handle to a [`FakeCapture`]
#[derive(Clone)]
pub struct MicHandle {
    state: Arc<Mutex<MicState>>,
}

/// Create a fake microphone and its handle
pub fn fake_capture() -> (FakeCapture, MicHandle) {
    let state = Arc::new(Mutex::new(MicState::default()));
    (
        FakeCapture {
            state: state.clone(),
        },
        MicHandle { state },
    )
}

impl MicHandle {
    /// Deliver one block as the device callback would
    ///
    /// Returns `false` when capture is not armed and the block went nowhere.
    pub fn push(&self, samples: &[f32]) -> bool {
        let state = self.state.lock().unwrap();
        match &state.analyzer {
            Some(analyzer) => {
                analyzer.analyze(samples);
                true
            }
            None => false,
        }
    }

    /// Report a device fault through the armed analyzer
    pub fn fault(&self, message: &str) -> bool {
        let state = self.state.lock().unwrap();
        match &state.analyzer {
            Some(analyzer) => {
                analyzer.report_fault(message.to_string());
                true
            }
            None => false,
        }
    }

    /// Simulate the device stream ending while armed
    pub fn unplug(&self) {
        self.state.lock().unwrap().analyzer = None;
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().unwrap().analyzer.is_some()
    }

    pub fn arm_count(&self) -> usize {
        self.state.lock().unwrap().arms
    }

    /// Make every following arm attempt fail
    pub fn fail_next_arm(&self) {
        self.state.lock().unwrap().fail_arm = true;
    }
}

impl CaptureSource for FakeCapture {
    fn arm(&mut self, analyzer: FrameAnalyzer) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_arm {
            return Err(Error::CaptureUnavailable("no input device".to_string()));
        }
        state.analyzer = Some(analyzer);
        state.arms += 1;
        Ok(())
    }

    fn disarm(&mut self) {
        self.state.lock().unwrap().analyzer = None;
    }

    fn is_armed(&self) -> bool {
        self.state.lock().unwrap().analyzer.is_some()
    }

    fn sample_rate(&self) -> u32 {
        TEST_SAMPLE_RATE
    }
}

// ---------------------------------------------------------------------------
// Speaker
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SpeakerState {
    played: Vec<AudioAsset>,
    pending: Vec<oneshot::Sender<Result<()>>>,
    stops: usize,
}

/// Player that records assets; playback ends instantly or on demand
pub struct FakePlayer {
    state: Arc<Mutex<SpeakerState>>,
    manual: bool,
}

/// Test-side handle to a [`FakePlayer`]
#[derive(Clone)]
pub struct SpeakerHandle {
    state: Arc<Mutex<SpeakerState>>,
}

/// Player whose playback completes immediately
pub fn instant_player() -> (FakePlayer, SpeakerHandle) {
    fake_player(false)
}

/// Player whose playback completes only through [`SpeakerHandle::finish`]
pub fn manual_player() -> (FakePlayer, SpeakerHandle) {
    fake_player(true)
}

fn fake_player(manual: bool) -> (FakePlayer, SpeakerHandle) {
    let state = Arc::new(Mutex::new(SpeakerState::default()));
    (
        FakePlayer {
            state: state.clone(),
            manual,
        },
        SpeakerHandle { state },
    )
}

impl SpeakerHandle {
    /// Assets handed to the player so far
    pub fn played(&self) -> Vec<AudioAsset> {
        self.state.lock().unwrap().played.clone()
    }

    /// Complete the oldest pending playback
    pub fn finish(&self, result: Result<()>) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.pending.is_empty() {
            return false;
        }
        let tx = state.pending.remove(0);
        tx.send(result).is_ok()
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }
}

impl Player for FakePlayer {
    fn play(&mut self, asset: AudioAsset) -> BoxFuture<'static, Result<()>> {
        let mut state = self.state.lock().unwrap();
        state.played.push(asset);

        if !self.manual {
            return async { Ok(()) }.boxed();
        }

        let (tx, rx) = oneshot::channel();
        state.pending.push(tx);
        async move { rx.await.unwrap_or(Ok(())) }.boxed()
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.stops += 1;
        state.pending.clear();
    }
}

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

/// Connection whose other end is a [`PeerHandle`]
pub struct FakeTransport {
    to_peer: mpsc::UnboundedSender<Frame>,
    from_peer: mpsc::UnboundedReceiver<Frame>,
    closed: Arc<Mutex<bool>>,
}

/// The peer's end of a [`FakeTransport`]
pub struct PeerHandle {
    to_client: Option<mpsc::UnboundedSender<Frame>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
    closed: Arc<Mutex<bool>>,
}

/// Hands out one prepared [`FakeTransport`]
pub struct FakeConnector {
    transport: Mutex<Option<FakeTransport>>,
}

/// Create a connector and the peer end of the connection it will open
pub fn fake_peer() -> (FakeConnector, PeerHandle) {
    let (to_peer, from_client) = mpsc::unbounded_channel();
    let (to_client, from_peer) = mpsc::unbounded_channel();
    let closed = Arc::new(Mutex::new(false));

    let transport = FakeTransport {
        to_peer,
        from_peer,
        closed: closed.clone(),
    };

    (
        FakeConnector {
            transport: Mutex::new(Some(transport)),
        },
        PeerHandle {
            to_client: Some(to_client),
            from_client,
            closed,
        },
    )
}

/// Connector that always fails
pub fn unreachable_peer() -> FakeConnector {
    FakeConnector {
        transport: Mutex::new(None),
    }
}

impl PeerHandle {
    pub fn send_text(&self, text: &str) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Frame::Text(text.to_string()));
        }
    }

    pub fn send_audio(&self, bytes: &[u8]) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Frame::Binary(bytes.to_vec()));
        }
    }

    /// Drop the peer's sending side, closing the connection
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }

    /// Next frame the client sent
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Every frame the client has sent so far
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Whether the client closed the connection
    pub fn client_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.to_peer.send(frame).map_err(|_| Error::TransportClosed)
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        self.from_peer.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Transport = FakeTransport;

    async fn connect(&self) -> Result<FakeTransport> {
        self.transport
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Transport("connection refused".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Every event emitted so far
pub fn drain_events(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Number of error events in `events`
pub fn count_errors(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Error { .. }))
        .count()
}
